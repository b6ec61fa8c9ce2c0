//! Bearer-token authentication.
//!
//! Verifies the `Authorization: Bearer` access token, then installs the
//! caller's [`RequestContext`] in the request extensions and in the
//! task-local slot for the rest of the request.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use super::{AuthError, TokenKind, TokenService};
use crate::context::RequestContext;
use crate::error::ApiError;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/health/components",
    "/ready",
    "/metrics",
    "/auth/login",
    "/auth/refresh",
    "/auth/register",
];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path.trim_end_matches('/')) || path == "/"
}

/// Build the caller context from request headers
pub fn context_from_headers(tokens: &TokenService, headers: &HeaderMap) -> Result<RequestContext, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let claims = tokens.verify(token, TokenKind::Access)?;
    let mut ctx = RequestContext::new(claims.sub, claims.company, claims.roles);
    if let Some(request_id) = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
    {
        ctx.request_id = request_id.to_string();
    }
    Ok(ctx)
}

pub async fn authenticate(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    let ctx = match context_from_headers(&state.tokens, request.headers()) {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::debug!(error = %err, path = %request.uri().path(), "authentication failed");
            return ApiError::from(err).into_response();
        }
    };

    let span = tracing::Span::current();
    span.record("request_id", ctx.request_id.as_str());
    span.record("user_id", tracing::field::display(ctx.user_id));

    request.extensions_mut().insert(ctx.clone());
    RequestContext::scope(ctx, next.run(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    fn tokens() -> TokenService {
        TokenService::new(b"0123456789abcdef0123456789abcdef", 60, 3600)
    }

    #[test]
    fn public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/auth/login"));
        assert!(is_public_path("/auth/login/"));
        assert!(!is_public_path("/auth/loginx"));
        assert!(!is_public_path("/loans"));
        assert!(!is_public_path("/users/me"));
    }

    #[test]
    fn missing_and_malformed_headers() {
        let tokens = tokens();
        assert!(matches!(
            context_from_headers(&tokens, &HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            context_from_headers(&tokens, &headers),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn access_token_builds_context() {
        let tokens = tokens();
        let (user, company) = (Uuid::new_v4(), Uuid::new_v4());
        let pair = tokens.issue_pair(user, company, &["Administrator".into()]).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.token)).unwrap(),
        );
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));
        let ctx = context_from_headers(&tokens, &headers).unwrap();
        assert_eq!(ctx.user_id, user);
        assert_eq!(ctx.company_id, company);
        assert!(ctx.is_admin());
        assert_eq!(ctx.request_id, "req-42");

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.refresh_token)).unwrap(),
        );
        assert!(matches!(
            context_from_headers(&tokens, &headers),
            Err(AuthError::WrongTokenKind)
        ));
    }
}
