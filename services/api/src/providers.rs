//! Per-session capability construction.
//!
//! Every room session gets its own speech recognizer, speech output,
//! language-model client and function dispatcher, so no provider resource
//! is shared between sessions.

use crate::config::Config;
use async_openai::config::OpenAIConfig;
use maakima_core::{
    email::{MailAccount, MailServerGateway},
    functions::FunctionDispatcher,
    llm_client::{LLMClient, OpenAICompatibleClient},
    room::RoomConnection,
    speech::{DeepgramStt, OpenAiSpeech, SpeechOutput, SpeechToText},
};
use std::sync::Arc;

pub trait ProviderFactory: Send + Sync {
    fn speech_to_text(&self) -> Arc<dyn SpeechToText>;

    /// Speech output that plays into `room`.
    fn speech_output(&self, room: Arc<dyn RoomConnection>) -> Arc<dyn SpeechOutput>;

    fn llm(&self) -> Arc<dyn LLMClient>;

    fn dispatcher(&self) -> FunctionDispatcher;
}

/// Deepgram recognition, OpenAI chat and speech, SMTP/IMAP mail.
pub struct DefaultProviders {
    openai: OpenAIConfig,
    deepgram_api_key: String,
    chat_model: String,
    tts_model: String,
    tts_voice: String,
    sender_email: String,
    mail_account: MailAccount,
}

impl DefaultProviders {
    pub fn from_config(config: &Config) -> Self {
        let openai = match &config.openai_api_key {
            Some(key) => OpenAIConfig::new().with_api_key(key),
            None => OpenAIConfig::new(),
        };
        let mail_account = MailAccount {
            address: config.sender_email.clone(),
            password: config.smtp_password.clone(),
            smtp_host: config.smtp_server.clone(),
            smtp_port: config.smtp_port,
            imap_host: config.imap_server.clone(),
            imap_port: config.imap_port,
        };

        Self {
            openai,
            deepgram_api_key: config.deepgram_api_key.clone(),
            chat_model: config.chat_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
            sender_email: config.sender_email.clone(),
            mail_account,
        }
    }
}

impl ProviderFactory for DefaultProviders {
    fn speech_to_text(&self) -> Arc<dyn SpeechToText> {
        Arc::new(DeepgramStt::new(self.deepgram_api_key.clone()))
    }

    fn speech_output(&self, room: Arc<dyn RoomConnection>) -> Arc<dyn SpeechOutput> {
        Arc::new(OpenAiSpeech::new(
            self.openai.clone(),
            &self.tts_model,
            &self.tts_voice,
            room,
        ))
    }

    fn llm(&self) -> Arc<dyn LLMClient> {
        Arc::new(OpenAICompatibleClient::new(
            self.openai.clone(),
            self.chat_model.clone(),
        ))
    }

    fn dispatcher(&self) -> FunctionDispatcher {
        let gateway = Arc::new(MailServerGateway::new(self.mail_account.clone()));
        FunctionDispatcher::email_assistant(gateway, self.sender_email.clone())
    }
}
