//! Main Entrypoint for the Maakima API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Loading the persona prompt and building the session manager.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use maakima_api::{
    config::Config,
    credentials::LiveKitTokenSigner,
    providers::DefaultProviders,
    router::create_router,
    session::{DEFAULT_GREETING, SessionManager, SessionSettings},
    state::AppState,
};
use maakima_core::room::BridgeConnector;
use std::{fs, net::SocketAddr, path::Path, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reads the persona prompt (`system_prompt.md`) from the prompts directory.
fn load_system_prompt(prompts_path: &Path) -> anyhow::Result<String> {
    let path = prompts_path.join("system_prompt.md");
    let prompt = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    anyhow::ensure!(!prompt.trim().is_empty(), "{} is empty", path.display());
    Ok(prompt)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    let placeholders = config.placeholder_settings();
    if !placeholders.is_empty() {
        warn!(
            settings = ?placeholders,
            "Running with placeholder settings; rooms and mail will not work until they are set"
        );
    }
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; chat and speech requests will fail");
    }

    // --- 3. Initialize Sessions ---
    let system_prompt = Arc::new(load_system_prompt(&config.prompts_path)?);
    info!(chars = system_prompt.len(), "Loaded persona prompt");

    let signer = Arc::new(LiveKitTokenSigner::new(
        config.livekit_api_key.clone(),
        config.livekit_api_secret.clone(),
        config.bot_identity.clone(),
        config.bot_name.clone(),
        config.token_ttl,
    ));
    let providers = Arc::new(DefaultProviders::from_config(&config));
    let sessions = SessionManager::new(
        signer,
        Arc::new(BridgeConnector),
        providers,
        SessionSettings {
            transport_url: config.livekit_url.clone(),
            system_prompt,
            greeting: DEFAULT_GREETING.to_string(),
            greeting_delay: config.greeting_delay,
            status_poll_interval: config.status_poll_interval,
        },
    );

    let app_state = Arc::new(AppState { sessions });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        room_url = %config.livekit_url,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
