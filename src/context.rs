//! Request-scoped caller context.
//!
//! The auth middleware builds a [`RequestContext`] from the bearer token and
//! stores it both in the request extensions and in a task-local slot, so
//! repositories can read the current user and company without threading
//! them through every call.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::future::Future;
use uuid::Uuid;

use crate::error::ApiError;

pub const ADMINISTRATOR: &str = "Administrator";
pub const COMPANY_ADMINISTRATOR: &str = "CompanyAdministrator";

tokio::task_local! {
    static CURRENT: RequestContext;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: Uuid,
    pub company_id: Uuid,
    /// Role names carried by the access token
    pub roles: Vec<String>,
}

impl RequestContext {
    pub fn new(user_id: Uuid, company_id: Uuid, roles: Vec<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            user_id,
            company_id,
            roles,
        }
    }

    /// Context of the task currently serving a request, if any
    pub fn current() -> Option<RequestContext> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Like [`RequestContext::current`], as an authentication failure when absent
    pub fn require() -> Result<RequestContext, ApiError> {
        Self::current().ok_or_else(|| ApiError::unauthenticated("no authenticated user"))
    }

    /// Run `fut` with `ctx` installed as the current context
    pub async fn scope<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
        CURRENT.scope(ctx, fut).await
    }

    /// Synchronous variant of [`RequestContext::scope`]
    pub fn sync_scope<R>(ctx: RequestContext, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(ctx, f)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Platform administrator: unrestricted, across companies
    pub fn is_admin(&self) -> bool {
        self.has_role(ADMINISTRATOR)
    }

    pub fn is_company_admin(&self) -> bool {
        self.has_role(COMPANY_ADMINISTRATOR)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("no authenticated user"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_installs_context() {
        assert!(RequestContext::current().is_none());
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec![ADMINISTRATOR.into()]);
        let seen = RequestContext::scope(ctx.clone(), async { RequestContext::current() }).await;
        assert_eq!(seen, Some(ctx));
        assert!(RequestContext::current().is_none());
    }

    #[test]
    fn roles() {
        let ctx = RequestContext::new(Uuid::nil(), Uuid::nil(), vec![COMPANY_ADMINISTRATOR.into()]);
        assert!(ctx.is_company_admin());
        assert!(!ctx.is_admin());
        assert!(RequestContext::sync_scope(ctx, RequestContext::require).is_ok());
        assert!(RequestContext::require().is_err());
    }
}
