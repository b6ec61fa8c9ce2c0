use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use std::sync::Arc;

use super::service::{AuthService, AuthSession};
use crate::error::Result;
use crate::jsonapi::{JsonApiResponse, JsonApiSerializer};
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/register", post(register))
}

fn session_document(state: &AppState, session: &AuthSession) -> Result<crate::jsonapi::Document> {
    Ok(JsonApiSerializer::new(state.base_url()).single(session)?)
}

async fn login(State(state): State<Arc<AppState>>, body: Bytes) -> Result<JsonApiResponse> {
    let session = AuthService::new(&state).login(&body)?;
    Ok(JsonApiResponse::ok(&session_document(&state, &session)?))
}

async fn refresh(State(state): State<Arc<AppState>>, body: Bytes) -> Result<JsonApiResponse> {
    let session = AuthService::new(&state).refresh(&body)?;
    Ok(JsonApiResponse::ok(&session_document(&state, &session)?))
}

async fn register(State(state): State<Arc<AppState>>, body: Bytes) -> Result<JsonApiResponse> {
    let session = AuthService::new(&state).register(&body)?;
    Ok(JsonApiResponse::created(&session_document(&state, &session)?, None))
}
