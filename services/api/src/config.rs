use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

// Placeholder defaults. They let the service start, but must be overridden
// for anything beyond local experiments.
const DEFAULT_DEEPGRAM_API_KEY: &str = "your-deepgram-api-key";
const DEFAULT_LIVEKIT_URL: &str = "wss://your-livekit-url";
const DEFAULT_LIVEKIT_API_KEY: &str = "your-livekit-api-key";
const DEFAULT_LIVEKIT_API_SECRET: &str = "your-livekit-api-secret";
const DEFAULT_SENDER_EMAIL: &str = "your-email@example.com";
const DEFAULT_SMTP_SERVER: &str = "smtp.example.com";
const DEFAULT_SMTP_PASSWORD: &str = "your-smtp-password";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub deepgram_api_key: String,
    pub livekit_url: String,
    pub livekit_api_key: String,
    pub livekit_api_secret: String,
    pub bot_identity: String,
    pub bot_name: String,
    pub token_ttl: Duration,
    pub sender_email: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_password: String,
    pub imap_server: String,
    pub imap_port: u16,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub prompts_path: PathBuf,
    pub greeting_delay: Duration,
    pub status_poll_interval: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:8080");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let livekit_url = var_or("LIVEKIT_URL", DEFAULT_LIVEKIT_URL);
        if livekit_url.trim().is_empty() {
            return Err(ConfigError::MissingVar(
                "LIVEKIT_URL must not be empty".to_string(),
            ));
        }

        let status_poll_ms = parse_var("STATUS_POLL_INTERVAL_MS", 1000u64)?;
        if status_poll_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "STATUS_POLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            log_level,
            deepgram_api_key: var_or("DEEPGRAM_API_KEY", DEFAULT_DEEPGRAM_API_KEY),
            livekit_url,
            livekit_api_key: var_or("LIVEKIT_API_KEY", DEFAULT_LIVEKIT_API_KEY),
            livekit_api_secret: var_or("LIVEKIT_API_SECRET", DEFAULT_LIVEKIT_API_SECRET),
            bot_identity: var_or("BOT_IDENTITY", "maakima_bot"),
            bot_name: var_or("BOT_NAME", "Maakima"),
            token_ttl: Duration::from_secs(parse_var("TOKEN_TTL_SECONDS", 3600u64)?),
            sender_email: var_or("SENDER_EMAIL", DEFAULT_SENDER_EMAIL),
            smtp_server: var_or("SMTP_SERVER", DEFAULT_SMTP_SERVER),
            smtp_port: parse_var("SMTP_PORT", 587u16)?,
            smtp_password: var_or("SMTP_PASSWORD", DEFAULT_SMTP_PASSWORD),
            imap_server: var_or("IMAP_SERVER", "imap.gmail.com"),
            imap_port: parse_var("IMAP_PORT", 993u16)?,
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            chat_model: var_or("CHAT_MODEL", "gpt-4o-mini"),
            tts_model: var_or("TTS_MODEL", "tts-1"),
            tts_voice: var_or("TTS_VOICE", "sage"),
            prompts_path: std::env::var("PROMPTS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./prompts")),
            greeting_delay: Duration::from_millis(parse_var("GREETING_DELAY_MS", 1000u64)?),
            status_poll_interval: Duration::from_millis(status_poll_ms),
        })
    }

    /// Names of the variables still holding their placeholder defaults.
    pub fn placeholder_settings(&self) -> Vec<&'static str> {
        [
            ("DEEPGRAM_API_KEY", &self.deepgram_api_key, DEFAULT_DEEPGRAM_API_KEY),
            ("LIVEKIT_URL", &self.livekit_url, DEFAULT_LIVEKIT_URL),
            ("LIVEKIT_API_KEY", &self.livekit_api_key, DEFAULT_LIVEKIT_API_KEY),
            ("LIVEKIT_API_SECRET", &self.livekit_api_secret, DEFAULT_LIVEKIT_API_SECRET),
            ("SENDER_EMAIL", &self.sender_email, DEFAULT_SENDER_EMAIL),
            ("SMTP_SERVER", &self.smtp_server, DEFAULT_SMTP_SERVER),
            ("SMTP_PASSWORD", &self.smtp_password, DEFAULT_SMTP_PASSWORD),
        ]
        .into_iter()
        .filter(|(_, value, default)| value.as_str() == *default)
        .map(|(name, _, _)| name)
        .collect()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("log_level", &self.log_level)
            .field("deepgram_api_key", &"[REDACTED]")
            .field("livekit_url", &self.livekit_url)
            .field("livekit_api_key", &self.livekit_api_key)
            .field("livekit_api_secret", &"[REDACTED]")
            .field("bot_identity", &self.bot_identity)
            .field("token_ttl", &self.token_ttl)
            .field("sender_email", &self.sender_email)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_password", &"[REDACTED]")
            .field("imap_server", &self.imap_server)
            .field("imap_port", &self.imap_port)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("chat_model", &self.chat_model)
            .field("tts_model", &self.tts_model)
            .field("tts_voice", &self.tts_voice)
            .field("prompts_path", &self.prompts_path)
            .field("greeting_delay", &self.greeting_delay)
            .field("status_poll_interval", &self.status_poll_interval)
            .finish()
    }
}
