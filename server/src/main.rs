//! Aiko Ingest - Main entry point.
//!
//! This binary starts the local ingestion endpoint with:
//! - Structured JSON logging
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`aiko_ingest::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! AIKO_PROJECT_KEY="pk_AAAAAAAAAAAAAAAAAAAAAA" \
//! AIKO_SECRET_KEY="BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB" \
//! PORT=8080 \
//! cargo run --bin aiko-ingest
//! ```

use std::process::ExitCode;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use aiko_ingest::config::Config;
use aiko_ingest::routes::{create_router, AppState, INGEST_PATH};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  AIKO_PROJECT_KEY      - Project key monitors send in X-Project-Key");
            eprintln!("  AIKO_SECRET_KEY       - 43-character base64url signing secret");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                  - HTTP server port (default: 8080)");
            eprintln!("  AIKO_INGEST_CAPACITY  - Events retained in memory (default: 1000)");
            eprintln!("  RUST_LOG              - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match serve(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        capacity = config.capacity,
        "Aiko ingest server starting"
    );

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState::new(config));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;
    info!(address = %bind_addr, path = INGEST_PATH, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    info!("Server shutting down gracefully");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output filtered by `RUST_LOG`, defaulting to `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
