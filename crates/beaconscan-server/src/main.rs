//! # beaconscan-server
//!
//! HTTP server for beaconscan, a permission and radio gated iBeacon
//! ranging service.
//!
//! This binary provides:
//! - The scan coordinator, driven by BlueZ when built with `bluetooth`
//! - REST API for status, visible beacons, regions, and start/stop
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beaconscan-server
//!
//! # Production
//! BEACONSCAN_ENV=production ./beaconscan-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use beaconscan_core::{BeaconError, Config, ConfigError, Coordinator};
use beaconscan_server::{api, backend, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beaconscan-server");

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path)
        .map_err(config_failure)
        .with_context(|| format!("Invalid configuration at {}", config_path.display()))?;
    let regions = config.region_set().map_err(config_failure)?;
    let addr = config.bind_address().map_err(config_failure)?;

    let collaborators = backend::collaborators(&config).await;
    let coordinator = Coordinator::spawn(regions.clone(), collaborators);

    let app = api::create_router(AppState::shared(coordinator.handle(), regions));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let last = coordinator.shutdown().await;
    info!(phase = ?last.phase, "Server stopped");

    Ok(())
}

fn config_failure(err: ConfigError) -> BeaconError {
    let err = BeaconError::from(err);
    error!(code = err.error_code(), error = %err, "Configuration unusable");
    err
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
