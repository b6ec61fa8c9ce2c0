//! Fixtures shared by unit tests

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::graph::GraphStore;
use crate::state::AppState;

pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Empty in-memory state with default settings
pub fn state() -> AppState {
    state_with(Arc::new(ServerConfig::with_secret(TEST_SECRET)))
}

pub fn state_with(config: Arc<ServerConfig>) -> AppState {
    crate::features::register_all().unwrap();
    AppState::with_store(config, GraphStore::new().unwrap())
}
