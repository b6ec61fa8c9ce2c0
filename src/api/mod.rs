//! HTTP surface: router assembly and the cross-cutting layers

pub mod actions;
pub mod crud;

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{REQUEST_ID_HEADER, authenticate};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::metrics::{METRICS, RequestMetrics, resource_label};
use crate::state::AppState;
use crate::{features, health, logging};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// The complete application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.config);
    Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/health/components", get(health::components_handler))
        .route("/ready", get(health::readiness_handler))
        .route("/metrics", get(metrics_handler))
        .merge(crate::auth::routes::routes())
        .merge(features::routes())
        .fallback(fallback)
        .layer(middleware::from_fn(conditional_get))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(logging::request_span::<axum::body::Body>))
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::IF_NONE_MATCH,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([header::ETAG, header::LOCATION]);

    if config.cors_origins.is_empty() {
        cors
    } else if config.cors_origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let metrics = RequestMetrics::new(resource_label(request.uri().path()), request.method().as_str());
    let response = next.run(request).await;
    metrics.finish(response.status().as_u16());
    response
}

/// Answer `304 Not Modified` when `If-None-Match` names the response's ETag
async fn conditional_get(request: Request, next: Next) -> Response {
    let candidates = (request.method() == Method::GET)
        .then(|| request.headers().get(header::IF_NONE_MATCH).cloned())
        .flatten();
    let response = next.run(request).await;

    let Some(candidates) = candidates else {
        return response;
    };
    let Some(etag) = response.headers().get(header::ETAG).cloned() else {
        return response;
    };
    if response.status() != StatusCode::OK || !etag_matches(&candidates, &etag) {
        return response;
    }
    (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response()
}

/// Weak comparison of an `If-None-Match` list against one ETag
fn etag_matches(candidates: &HeaderValue, etag: &HeaderValue) -> bool {
    let (Ok(candidates), Ok(etag)) = (candidates.to_str(), etag.to_str()) else {
        return false;
    };
    let opaque = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let etag = opaque(etag);
    candidates
        .split(',')
        .any(|candidate| candidate.trim() == "*" || opaque(candidate) == etag)
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
        METRICS.encode(),
    )
}

async fn fallback(request: Request) -> ApiError {
    ApiError::not_found("route", request.uri().path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(raw: &'static str) -> HeaderValue {
        HeaderValue::from_static(raw)
    }

    #[test]
    fn etags_compare_weakly() {
        let etag = value("W/\"abc\"");
        assert!(etag_matches(&value("W/\"abc\""), &etag));
        assert!(etag_matches(&value("\"abc\""), &etag));
        assert!(etag_matches(&value("\"x\", W/\"abc\""), &etag));
        assert!(etag_matches(&value("*"), &etag));
        assert!(!etag_matches(&value("W/\"abd\""), &etag));
    }
}
