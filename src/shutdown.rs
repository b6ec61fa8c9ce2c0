//! Graceful shutdown.
//!
//! On SIGINT or SIGTERM the HTTP server stops accepting connections, then
//! the coordinator walks through its phases, each bounded by a timeout:
//!
//! 1. **Stop accepting**: the cancellation token fires
//! 2. **Wait for in-flight**: requests still running get time to finish
//! 3. **Flush**: registered handlers persist state (graph snapshot)
//! 4. **Cleanup**: handlers release what is left
//!
//! Exceeding the total timeout forces the shutdown through.

use anyhow::Result;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub in_flight_timeout: Duration,
    pub flush_timeout: Duration,
    pub cleanup_timeout: Duration,
    /// Upper bound for the whole sequence
    pub total_timeout: Duration,
    pub force_shutdown_on_timeout: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            in_flight_timeout: Duration::from_secs(20),
            flush_timeout: Duration::from_secs(5),
            cleanup_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(30),
            force_shutdown_on_timeout: true,
        }
    }
}

impl ShutdownConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self::default().with_total_timeout(config.graceful_shutdown_timeout_secs)
    }

    /// Set the total timeout; the in-flight wait never exceeds it
    pub fn with_total_timeout(mut self, timeout_secs: u64) -> Self {
        self.total_timeout = Duration::from_secs(timeout_secs);
        self.in_flight_timeout = self.in_flight_timeout.min(self.total_timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    StopAccepting,
    WaitingInFlight,
    Flushing,
    Cleanup,
    Complete,
    /// The total timeout was exceeded
    Forced,
}

/// A component with state to persist or release on shutdown
#[async_trait::async_trait]
pub trait ShutdownHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes the graph snapshot when one is configured
pub struct SnapshotShutdownHandler {
    state: Arc<AppState>,
}

impl SnapshotShutdownHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl ShutdownHandler for SnapshotShutdownHandler {
    fn name(&self) -> &'static str {
        "graph_snapshot"
    }

    async fn flush(&self) -> Result<()> {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || state.flush_snapshot()).await??;
        if let Some(path) = self.state.config.snapshot_path.as_deref() {
            info!(path = %path.display(), "graph snapshot written");
        }
        Ok(())
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: RwLock<ShutdownPhase>,
    token: CancellationToken,
    active_requests: AtomicU64,
    handlers: Vec<Box<dyn ShutdownHandler>>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: RwLock::new(ShutdownPhase::Running),
            token: CancellationToken::new(),
            active_requests: AtomicU64::new(0),
            handlers: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Box<dyn ShutdownHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn phase(&self) -> ShutdownPhase {
        *self.phase.read().await
    }

    async fn enter(&self, phase: ShutdownPhase) {
        *self.phase.write().await = phase;
        debug!(%phase, "shutdown phase");
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn request_started(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Resolve on SIGINT or SIGTERM, or when the token is cancelled
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(err) => {
                    error!(error = %err, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
            _ = self.token.cancelled() => info!("shutdown requested"),
        }
    }

    /// Run every phase; forced through on timeout when configured
    pub async fn shutdown(&self) -> Result<()> {
        info!("starting graceful shutdown sequence");
        let result = match timeout(self.config.total_timeout, self.run_phases()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "shutdown exceeded {}s",
                self.config.total_timeout.as_secs()
            )),
        };

        match result {
            Ok(()) => {
                self.enter(ShutdownPhase::Complete).await;
                info!("graceful shutdown completed");
                Ok(())
            }
            Err(err) if self.config.force_shutdown_on_timeout => {
                warn!(error = %err, "graceful shutdown failed, forcing");
                self.enter(ShutdownPhase::Forced).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn run_phases(&self) -> Result<()> {
        self.enter(ShutdownPhase::StopAccepting).await;
        self.token.cancel();

        self.enter(ShutdownPhase::WaitingInFlight).await;
        self.wait_in_flight().await;

        self.enter(ShutdownPhase::Flushing).await;
        for handler in &self.handlers {
            match timeout(self.config.flush_timeout, handler.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(handler = handler.name(), error = %err, "flush failed"),
                Err(_) => warn!(handler = handler.name(), "flush timed out"),
            }
        }

        self.enter(ShutdownPhase::Cleanup).await;
        for handler in &self.handlers {
            match timeout(self.config.cleanup_timeout, handler.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(handler = handler.name(), error = %err, "shutdown failed"),
                Err(_) => warn!(handler = handler.name(), "shutdown timed out"),
            }
        }
        Ok(())
    }

    async fn wait_in_flight(&self) {
        let deadline = tokio::time::Instant::now() + self.config.in_flight_timeout;
        loop {
            let active = self.active_request_count();
            if active == 0 {
                debug!("no requests in flight");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining_requests = active, "in-flight timeout reached");
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Count the request as in flight while it runs
pub async fn track_in_flight(
    State(coordinator): State<Arc<ShutdownCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    coordinator.request_started();
    let response = next.run(request).await;
    coordinator.request_finished();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        flushed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ShutdownHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn flush(&self) -> Result<()> {
            self.flushed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn in_flight_wait_is_capped_by_total() {
        let config = ShutdownConfig::default().with_total_timeout(5);
        assert_eq!(config.total_timeout, Duration::from_secs(5));
        assert_eq!(config.in_flight_timeout, Duration::from_secs(5));
    }

    #[test]
    fn phase_names() {
        assert_eq!(ShutdownPhase::WaitingInFlight.to_string(), "waiting_in_flight");
        assert_eq!(ShutdownPhase::Forced.to_string(), "forced");
    }

    #[tokio::test]
    async fn shutdown_runs_handlers() {
        let flushed = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default())
            .with_handler(Box::new(Counting { flushed: flushed.clone() }));
        let token = coordinator.token();

        coordinator.request_started();
        coordinator.request_finished();
        assert_eq!(coordinator.active_request_count(), 0);

        coordinator.shutdown().await.unwrap();
        assert!(token.is_cancelled());
        assert_eq!(coordinator.phase().await, ShutdownPhase::Complete);
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn snapshot_handler_writes_the_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.nq");
        let mut config = crate::config::ServerConfig::with_secret("0123456789abcdef0123456789abcdef");
        config.snapshot_path = Some(path.clone());
        let state = Arc::new(crate::testing::state_with(Arc::new(config)));
        crate::bootstrap::run(&state).unwrap();

        SnapshotShutdownHandler::new(state).flush().await.unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
