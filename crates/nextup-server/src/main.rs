#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::routes::router;
use server::state::AppState;
use server::telemetry::{init_telemetry, shutdown_telemetry};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let state = AppState::from_config(&config).await?;
    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    log_startup_info(&config);

    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state.shutdown.clone()))
        .await
        .context("server error");

    state.close(config.shutdown_timeout).await;
    tracing::info!("Server shut down");
    shutdown_telemetry(providers);

    served
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ticket service on {} with full config: {:#?}",
            config.addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.addr,
            broadcast = %config.broadcast,
            persistent = config.database_url.is_some(),
            "Starting ticket service"
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM and cancels `token` so open sockets close.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = token.cancelled() => {}
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    token.cancel();
}
