use crate::auth::TokenService;
use crate::config::ServerConfig;
use crate::graph::GraphStore;
use crate::registry::MODELS;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Shared by every handler
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: GraphStore,
    pub tokens: TokenService,
    started_at: Instant,
}

impl AppState {
    /// Open the store (restoring the snapshot when present) and register models
    pub fn new(config: Arc<ServerConfig>) -> Result<Self> {
        crate::features::register_all().context("failed to register resource models")?;
        let store = GraphStore::open(config.snapshot_path.as_deref())
            .context("failed to open graph store")?;
        info!(models = MODELS.len(), quads = store.len().unwrap_or_default(), "application state ready");
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Arc<ServerConfig>, store: GraphStore) -> Self {
        let tokens = TokenService::from_config(&config);
        Self {
            config,
            store,
            tokens,
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Base for `links.self` and pagination links
    pub fn base_url(&self) -> &str {
        &self.config.public_base_url
    }

    /// Write the graph to the configured snapshot file, if any
    pub fn flush_snapshot(&self) -> Result<()> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(());
        };
        let _guard = self.store.lock_writes();
        self.store
            .dump_snapshot(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))
    }
}
