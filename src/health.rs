use crate::registry::MODELS;
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Health status for a component or the overall system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, with a problem worth looking at
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn with(component: impl Into<String>, status: HealthStatus, error: Option<String>) -> Self {
        Self {
            component: component.into(),
            status,
            error,
            timestamp: now(),
            details: None,
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with(component, HealthStatus::Healthy, None)
    }

    pub fn degraded(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with(component, HealthStatus::Degraded, Some(error.into()))
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self::with(component, HealthStatus::Unhealthy, Some(error.into()))
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
    pub uptime_secs: u64,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<String>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: HashMap<String, ComponentHealth>,
}

impl IntoResponse for ComponentHealthResponse {
    fn into_response(self) -> Response {
        let status = self.status.status_code();
        (status, Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Healthy whenever the process can answer
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.state.uptime_secs(),
        }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let components = self.check_all_components();
        let mut overall = HealthStatus::Healthy;
        let mut not_ready = Vec::new();

        for (name, health) in &components {
            overall = overall.combine(health.status);
            if health.status == HealthStatus::Unhealthy {
                not_ready.push(name.clone());
            }
        }
        not_ready.sort();

        ReadinessResponse {
            ready: overall != HealthStatus::Unhealthy,
            status: overall,
            timestamp: now(),
            not_ready,
        }
    }

    pub fn components(&self) -> ComponentHealthResponse {
        let components = self.check_all_components();
        let status = components
            .values()
            .fold(HealthStatus::Healthy, |overall, health| overall.combine(health.status));

        ComponentHealthResponse {
            status,
            timestamp: now(),
            components,
        }
    }

    fn check_all_components(&self) -> HashMap<String, ComponentHealth> {
        [self.check_graph_store(), self.check_registry(), self.check_snapshot()]
            .into_iter()
            .map(|health| (health.component.clone(), health))
            .collect()
    }

    fn check_graph_store(&self) -> ComponentHealth {
        let store = &self.state.store;
        match store.health_check().and_then(|_| store.len()) {
            Ok(quads) => ComponentHealth::healthy("graph_store").details(serde_json::json!({ "quads": quads })),
            Err(e) => ComponentHealth::unhealthy("graph_store", format!("graph query failed: {e}")),
        }
    }

    fn check_registry(&self) -> ComponentHealth {
        if MODELS.is_empty() {
            return ComponentHealth::unhealthy("registry", "no resource models registered");
        }
        ComponentHealth::healthy("registry").details(serde_json::json!({ "models": MODELS.len() }))
    }

    /// Degraded when the snapshot could not be written on shutdown
    fn check_snapshot(&self) -> ComponentHealth {
        let Some(path) = self.state.config.snapshot_path.as_deref() else {
            return ComponentHealth::healthy("snapshot").details(serde_json::json!({ "configured": false }));
        };
        let details = serde_json::json!({
            "configured": true,
            "path": path.display().to_string(),
            "exists": path.exists(),
        });
        match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            Some(dir) if !dir.is_dir() => ComponentHealth::degraded(
                "snapshot",
                format!("snapshot directory does not exist: {}", dir.display()),
            )
            .details(details),
            _ => ComponentHealth::healthy("snapshot").details(details),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub async fn liveness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    HealthChecker::new(state).liveness()
}

pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    HealthChecker::new(state).readiness()
}

pub async fn components_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    HealthChecker::new(state).components()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn health_status_combine() {
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::Healthy.combine(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.combine(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn health_status_codes() {
        assert_eq!(HealthStatus::Healthy.status_code(), StatusCode::OK);
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn fresh_state_is_ready() {
        let checker = HealthChecker::new(Arc::new(crate::testing::state()));
        let readiness = checker.readiness();
        assert!(readiness.ready);
        assert!(readiness.not_ready.is_empty());

        let components = checker.components();
        assert_eq!(components.status, HealthStatus::Healthy);
        assert!(components.components.contains_key("graph_store"));
        assert!(components.components.contains_key("registry"));
    }

    #[test]
    fn missing_snapshot_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::with_secret("0123456789abcdef0123456789abcdef");
        config.snapshot_path = Some(dir.path().join("gone").join("graph.nq"));
        let checker = HealthChecker::new(Arc::new(crate::testing::state_with(Arc::new(config))));

        let snapshot = checker.check_snapshot();
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert!(checker.readiness().ready);
    }
}
