//! Login, token refresh and self-service registration

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::password::{MIN_PASSWORD_LEN, hash_password, verify_password};
use super::{AuthError, TokenKind, TokenPair};
use crate::bootstrap;
use crate::context::COMPANY_ADMINISTRATOR;
use crate::error::{ApiError, Result};
use crate::features::companies::Company;
use crate::features::users::{User, unique_email};
use crate::jsonapi::IncomingDocument;
use crate::repository::{Repository, WriteSet};
use crate::resource::{ApiEntity, Related, RelationshipDescriptor, ResourceDescriptor, Scope};
use crate::state::AppState;
use crate::validation::{Violations, validate_email, validate_length, validate_required};

static RELATIONSHIPS: [RelationshipDescriptor; 1] =
    [RelationshipDescriptor::one("user", "AUTHENTICATES", "users").read_only()];

pub static AUTH_SESSIONS: ResourceDescriptor = ResourceDescriptor {
    type_name: "auth",
    endpoint: "auth",
    label: "AuthSession",
    attributes: &["token", "refreshToken", "expiration"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Global,
    search_fields: &[],
    sortable: &[],
    default_sort: "",
    persisted: false,
    from_record: None,
};

/// Issued tokens together with the user they belong to
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: Uuid,
    pub token: String,
    pub refresh_token: String,
    pub expiration: DateTime<Utc>,
    pub user: Option<User>,
}

impl ApiEntity for AuthSession {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &AUTH_SESSIONS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("token", json!(self.token)),
            ("refreshToken", json!(self.refresh_token)),
            ("expiration", json!(self.expiration)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![("user", Related::one(&self.user))]
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginAttributes {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAttributes {
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAttributes {
    company_name: Option<String>,
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

pub struct AuthService<'s> {
    state: &'s AppState,
    users: Repository<User>,
}

impl<'s> AuthService<'s> {
    pub fn new(state: &'s AppState) -> Self {
        Self {
            state,
            users: Repository::new(&state.store),
        }
    }

    fn session(&self, user: User) -> Result<AuthSession> {
        if !user.is_active {
            return Err(AuthError::InactiveUser.into());
        }
        let company = user
            .company_id()
            .ok_or_else(|| ApiError::internal(format!("user '{}' has no company", user.id)))?;
        let TokenPair {
            token,
            refresh_token,
            expiration,
        } = self.state.tokens.issue_pair(user.id, company, &user.role_names())?;
        Ok(AuthSession {
            id: Uuid::new_v4(),
            token,
            refresh_token,
            expiration,
            user: Some(user),
        })
    }

    /// Exchange credentials for a token pair
    pub fn login(&self, body: &[u8]) -> Result<AuthSession> {
        let attrs = IncomingDocument::<LoginAttributes>::parse(body, &AUTH_SESSIONS, None)?.attributes;
        let (Some(email), Some(password)) = (attrs.email, attrs.password) else {
            return Err(AuthError::InvalidCredentials.into());
        };

        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_where("email", email.as_str())?
            .into_iter()
            .next();
        let Some(user) = user.filter(|user| {
            user.password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(&password, hash))
        }) else {
            tracing::info!(email = %email, "login rejected");
            return Err(AuthError::InvalidCredentials.into());
        };

        tracing::info!(user = %user.id, "login succeeded");
        self.session(user)
    }

    /// New token pair for a valid refresh token; roles are re-read from the graph
    pub fn refresh(&self, body: &[u8]) -> Result<AuthSession> {
        let attrs = IncomingDocument::<RefreshAttributes>::parse(body, &AUTH_SESSIONS, None)?.attributes;
        let token = attrs.refresh_token.ok_or(AuthError::MissingToken)?;
        let claims = self.state.tokens.verify(&token, TokenKind::Refresh)?;
        let user = self
            .users
            .load(claims.sub)?
            .ok_or_else(|| AuthError::InvalidToken("unknown user".into()))?;
        self.session(user)
    }

    /// Create a company and its first company administrator
    pub fn register(&self, body: &[u8]) -> Result<AuthSession> {
        if !self.state.config.allow_registration {
            return Err(AuthError::RegistrationDisabled.into());
        }
        let attrs = IncomingDocument::<RegisterAttributes>::parse(body, &AUTH_SESSIONS, None)?.attributes;

        let mut violations = Violations::new();
        for (field, value) in [("companyName", &attrs.company_name), ("name", &attrs.name)] {
            if let Some(value) = violations.check(validate_required(field, value.as_deref())) {
                violations.check(validate_length(field, value.trim(), 1, 200));
            }
        }
        if let Some(email) = violations.check(validate_required("email", attrs.email.as_deref())) {
            violations.check(validate_email("email", email.trim()));
        }
        if let Some(password) = violations.check(validate_required("password", attrs.password.as_deref())) {
            violations.check(validate_length("password", password, MIN_PASSWORD_LEN, 256));
        }
        violations.finish()?;
        let password_hash = hash_password(attrs.password.as_deref().unwrap_or_default())?;

        let (company_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
        {
            let _guard = self.state.store.lock_writes();
            let email = unique_email(&self.state.store, attrs.email.as_deref().unwrap_or_default(), None)?;

            let mut company = WriteSet::new();
            company
                .set("name", attrs.company_name.as_deref().unwrap_or_default().trim())
                .relate("features", bootstrap::production_features(self.state)?);
            Repository::<Company>::new(&self.state.store).create(company_id, company)?;

            let mut user = WriteSet::new();
            user.set("email", email)
                .set("name", attrs.name.as_deref().unwrap_or_default().trim())
                .set("passwordHash", password_hash)
                .set("isActive", true)
                .relate_one("company", Some(company_id))
                .relate("roles", vec![bootstrap::role_id(COMPANY_ADMINISTRATOR)]);
            self.users.create(user_id, user)?;
        }
        tracing::info!(company = %company_id, user = %user_id, "company registered");

        let user = self
            .users
            .load(user_id)?
            .ok_or_else(|| ApiError::not_found("users", user_id))?;
        self.session(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::ErrorCode;
    use std::sync::Arc;

    fn registering_state() -> AppState {
        let mut config = ServerConfig::with_secret("0123456789abcdef0123456789abcdef");
        config.allow_registration = true;
        let state = crate::testing::state_with(Arc::new(config));
        bootstrap::run(&state).unwrap();
        state
    }

    fn body(attributes: Value) -> Vec<u8> {
        json!({ "data": { "type": "auth", "attributes": attributes } })
            .to_string()
            .into_bytes()
    }

    fn register(service: &AuthService<'_>, email: &str) -> Result<AuthSession> {
        service.register(&body(json!({
            "companyName": "Acme",
            "name": "Ada",
            "email": email,
            "password": "correct horse",
        })))
    }

    #[test]
    fn register_then_login() {
        let state = registering_state();
        let service = AuthService::new(&state);
        let registered = register(&service, "Ada@Acme.test").unwrap();
        let user = registered.user.as_ref().unwrap();
        assert_eq!(user.email, "ada@acme.test");
        assert_eq!(user.role_names(), vec![COMPANY_ADMINISTRATOR.to_string()]);
        let company = Repository::<Company>::new(&state.store)
            .load(user.company_id().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(company.name, "Acme");
        assert!(!company.features.is_empty());

        let claims = state.tokens.verify(&registered.token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(Some(claims.company), user.company_id());

        let session = service
            .login(&body(json!({ "email": " ADA@acme.test", "password": "correct horse" })))
            .unwrap();
        assert_eq!(session.user.map(|u| u.id), Some(user.id));

        let err = register(&service, "ada@acme.test").unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[test]
    fn wrong_password_and_unknown_email_look_alike() {
        let state = registering_state();
        let service = AuthService::new(&state);
        register(&service, "ada@acme.test").unwrap();

        let wrong = service
            .login(&body(json!({ "email": "ada@acme.test", "password": "incorrect" })))
            .unwrap_err();
        let unknown = service
            .login(&body(json!({ "email": "bob@acme.test", "password": "incorrect" })))
            .unwrap_err();
        assert_eq!(wrong.code, ErrorCode::Unauthenticated);
        assert_eq!(wrong.detail, unknown.detail);
    }

    #[test]
    fn refresh_rejects_access_tokens() {
        let state = registering_state();
        let service = AuthService::new(&state);
        let session = register(&service, "ada@acme.test").unwrap();

        let refreshed = service
            .refresh(&body(json!({ "refreshToken": session.refresh_token })))
            .unwrap();
        assert!(state.tokens.verify(&refreshed.token, TokenKind::Access).is_ok());

        let err = service
            .refresh(&body(json!({ "refreshToken": session.token })))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
    }

    #[test]
    fn registration_can_be_disabled() {
        let state = crate::testing::state();
        let err = register(&AuthService::new(&state), "ada@acme.test").unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[test]
    fn inactive_users_cannot_log_in() {
        let state = registering_state();
        let service = AuthService::new(&state);
        let session = register(&service, "ada@acme.test").unwrap();
        let id = session.user.unwrap().id;
        let mut write = WriteSet::new();
        write.set("isActive", false);
        Repository::<User>::new(&state.store).update(id, write).unwrap();

        let err = service
            .login(&body(json!({ "email": "ada@acme.test", "password": "correct horse" })))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthenticated);
    }
}
