//! Routes outside plain CRUD

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use std::sync::Arc;

use super::crud::parse_id;
use crate::context::RequestContext;
use crate::error::Result;
use crate::features::analytics::{self, ANALYTICS};
use crate::features::loans::{self, LOANS};
use crate::features::notifications::{self, NOTIFICATIONS};
use crate::features::users;
use crate::jsonapi::{JsonApiResponse, JsonApiSerializer};
use crate::resource::ApiEntity;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/me", get(me))
        .route("/loans/{id}/return", post(return_loan))
        .route("/notifications/{id}/read", post(mark_read))
        .route(&format!("/{}", ANALYTICS.endpoint), get(dashboard))
}

fn single(state: &AppState, entity: &dyn ApiEntity) -> Result<JsonApiResponse> {
    let document = JsonApiSerializer::new(state.base_url()).single(entity)?;
    Ok(JsonApiResponse::ok(&document))
}

async fn me(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Result<JsonApiResponse> {
    single(&state, &users::me(&state, &ctx)?)
}

async fn return_loan(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<JsonApiResponse> {
    let id = parse_id(&LOANS, &id)?;
    single(&state, &loans::return_loan(&state, &ctx, id)?)
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<JsonApiResponse> {
    let id = parse_id(&NOTIFICATIONS, &id)?;
    single(&state, &notifications::mark_read(&state, &ctx, id)?)
}

async fn dashboard(State(state): State<Arc<AppState>>, ctx: RequestContext) -> Result<JsonApiResponse> {
    single(&state, &analytics::compute(&state, &ctx)?)
}
