//! Main Entrypoint for the Call Relay Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Selecting the RPC backend.
//! 3. Constructing the executor and the Axum router.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use callrelay_core::{Executor, TwilioConfig};
use callrelay_server::{config::Config, router::create_router, rpc, state::AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown.cancel();
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

    // --- 3. Initialize Shared Services ---
    let rpc = rpc::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let executor = Executor::new(
        rpc,
        TwilioConfig {
            account_sid: config.twilio_account_sid.clone(),
            openai_url: config.openai_url.clone(),
        },
        shutdown.clone(),
    );

    let bind_address = config.bind_address;
    info!(
        bind_address = %bind_address,
        account_check = config.twilio_account_sid.is_some(),
        fake_rpc = config.fake_rpc,
        "Service configured. Starting server..."
    );

    let app_state = Arc::new(AppState {
        executor: Arc::new(executor),
        config: Arc::new(config),
        shutdown: shutdown.clone(),
    });

    // --- 4. Start Server ---
    let app = create_router(app_state);
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server has shut down.");
    Ok(())
}
