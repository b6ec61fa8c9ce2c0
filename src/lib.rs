pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod graph;
pub mod health;
pub mod jsonapi;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod permissions;
pub mod registry;
pub mod repository;
pub mod resource;
pub mod service;
pub mod shutdown;
pub mod state;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use api::build_router;
pub use config::{CliArgs, ServerConfig};
pub use error::{ApiError, ErrorCode};
pub use logging::{LoggingConfig, init_logging, shutdown_telemetry};
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use state::AppState;

use anyhow::Result;
use axum::middleware;
use shutdown::SnapshotShutdownHandler;
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone())?);
    bootstrap::run(&state)?;

    let coordinator = Arc::new(
        ShutdownCoordinator::new(ShutdownConfig::from_server_config(&config))
            .with_handler(Box::new(SnapshotShutdownHandler::new(state.clone()))),
    );

    let router = build_router(state).layer(middleware::from_fn_with_state(
        coordinator.clone(),
        shutdown::track_in_flight,
    ));

    let listener = TcpListener::bind(config.http_bind).await?;
    tracing::info!(
        bind = %listener.local_addr()?,
        snapshot = ?config.snapshot_path,
        registration = config.allow_registration,
        "listening"
    );

    let signal = coordinator.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move { signal.wait_for_signal().await })
        .await;

    tracing::info!("server stopped, running shutdown handlers");
    coordinator.shutdown().await?;
    served.map_err(anyhow::Error::from)
}
