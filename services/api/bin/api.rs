//! Main Entrypoint for the Rehearse API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the shared services (boundaries, scenario catalog, responder).
//! 3. Starting the idle-session sweeper and constructing the Axum router.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use rehearse_api::{
    bootstrap::build_state, config::Config, router::create_router, sessions::spawn_idle_sweeper,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; feedback requests will report a configuration error");
    }
    if config.elevenlabs_api_key.is_none() {
        warn!("ELEVENLABS_API_KEY is not set; speech requests will report a configuration error");
    }

    // --- 2. Initialize Shared Services ---
    let bind_address = config.bind_address;
    let feedback_model = config.feedback_model.clone();
    let app_state = Arc::new(build_state(config).context("Failed to build application state")?);

    // --- 3. Create Router ---
    let idle_ttl = app_state.config.session_idle_ttl;
    let sweeper = spawn_idle_sweeper(app_state.clone());
    info!(idle_ttl = ?idle_ttl, "Idle session sweeper started");
    let app = create_router(app_state);

    // --- 4. Start Server ---
    info!(
        model = %feedback_model,
        bind_address = %bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("Server has shut down.");
    Ok(())
}
