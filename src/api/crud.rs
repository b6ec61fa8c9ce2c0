//! Generic JSON:API handlers over [`CrudService`]

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::MethodRouter;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::jsonapi::{JsonApiResponse, JsonApiSerializer, Paging};
use crate::resource::ResourceDescriptor;
use crate::service::{CrudResource, CrudService};
use crate::state::AppState;

/// Ids that are not UUIDs cannot name a node
pub fn parse_id(descriptor: &ResourceDescriptor, raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(descriptor.type_name, raw))
}

fn collection_url(state: &AppState, descriptor: &ResourceDescriptor) -> String {
    format!("{}/{}", state.base_url().trim_end_matches('/'), descriptor.endpoint)
}

/// Collection and member routes for `E`, limited to its operations
pub fn routes<E>() -> Router<Arc<AppState>>
where
    E: CrudResource + 'static,
{
    let operations = E::OPERATIONS;
    let endpoint = E::resource().endpoint;

    let mut collection = MethodRouter::new();
    if operations.list {
        collection = collection.get(list::<E>);
    }
    if operations.create {
        collection = collection.post(create::<E>);
    }

    let mut member = MethodRouter::new();
    if operations.show {
        member = member.get(show::<E>);
    }
    if operations.update {
        member = member.patch(update::<E>);
    }
    if operations.delete {
        member = member.delete(delete::<E>);
    }

    Router::new()
        .route(&format!("/{endpoint}"), collection)
        .route(&format!("/{endpoint}/{{id}}"), member)
}

async fn list<E: CrudResource>(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<JsonApiResponse> {
    let (page, query) = CrudService::<E>::new(&state).list(&ctx, &params)?;
    let base = collection_url(&state, E::resource());
    let document = JsonApiSerializer::new(state.base_url()).collection(
        &page.items,
        Some(Paging {
            query: &query,
            total: page.total,
            base: &base,
        }),
    )?;
    Ok(JsonApiResponse::ok(&document))
}

async fn show<E: CrudResource>(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<JsonApiResponse> {
    let id = parse_id(E::resource(), &id)?;
    let entity = CrudService::<E>::new(&state).show(&ctx, id)?;
    let document = JsonApiSerializer::new(state.base_url()).single(&entity)?;
    Ok(JsonApiResponse::ok(&document))
}

async fn create<E: CrudResource>(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<JsonApiResponse> {
    let entity = CrudService::<E>::new(&state).create(&ctx, &body)?;
    let document = JsonApiSerializer::new(state.base_url()).single(&entity)?;
    let location = format!("{}/{}", collection_url(&state, E::resource()), entity.id());
    Ok(JsonApiResponse::created(&document, Some(location)))
}

async fn update<E: CrudResource>(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<JsonApiResponse> {
    let id = parse_id(E::resource(), &id)?;
    let entity = CrudService::<E>::new(&state).update(&ctx, id, &body)?;
    let document = JsonApiSerializer::new(state.base_url()).single(&entity)?;
    Ok(JsonApiResponse::ok(&document))
}

async fn delete<E: CrudResource>(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<JsonApiResponse> {
    let id = parse_id(E::resource(), &id)?;
    CrudService::<E>::new(&state).delete(&ctx, id)?;
    Ok(JsonApiResponse::no_content())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::loans::LOANS;

    #[test]
    fn malformed_ids_are_not_found() {
        let err = parse_id(&LOANS, "42").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::NotFound);
        assert!(parse_id(&LOANS, "0b6b5b2e-2c1f-4d8e-9a55-0f1e2d3c4b5a").is_ok());
    }
}
