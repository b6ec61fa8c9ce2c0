use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::companies::Company;
use super::roles::Role;
use crate::auth::password::{MIN_PASSWORD_LEN, hash_password};
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::repository::{Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{
    ValidationError, Violations, validate_email, validate_length, validate_required, validate_url,
};

static RELATIONSHIPS: [RelationshipDescriptor; 2] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies"),
    RelationshipDescriptor::many("roles", "MEMBER_OF", "roles"),
];

pub static USERS: ResourceDescriptor = ResourceDescriptor {
    type_name: "users",
    endpoint: "users",
    label: "User",
    attributes: &["email", "name", "title", "avatar", "isActive", "createdAt", "updatedAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &["name", "email", "title"],
    sortable: &["name", "email", "createdAt", "updatedAt"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<User>),
};

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub title: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    /// Stored, never serialised
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub roles: Vec<Role>,
}

impl User {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.name.clone()).collect()
    }

    pub fn company_id(&self) -> Option<Uuid> {
        self.company.as_ref().map(|company| company.id)
    }
}

impl ApiEntity for User {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &USERS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("email", json!(self.email)),
            ("name", json!(self.name)),
            ("title", json!(self.title)),
            ("avatar", json!(self.avatar)),
            ("isActive", json!(self.is_active)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("roles", Related::many(&self.roles)),
        ]
    }
}

impl Entity for User {
    fn resource() -> &'static ResourceDescriptor {
        &USERS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            email: node.string("email")?,
            name: node.string("name")?,
            title: node.opt_string("title")?,
            avatar: node.opt_string("avatar")?,
            is_active: node.opt_bool("isActive")?.unwrap_or(true),
            password_hash: node.opt_string("passwordHash")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            company: record.single("company")?,
            roles: record.many("roles")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributes {
    email: Option<String>,
    name: Option<String>,
    password: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    title: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    avatar: Option<Option<String>>,
    is_active: Option<bool>,
    #[serde(skip)]
    password_hash: Option<String>,
}

/// Validate, then replace the plain password with its argon2 hash
fn digest(attrs: &mut UserAttributes, creating: bool) -> Result<()> {
    check(attrs, creating)?;
    if let Some(password) = attrs.password.take() {
        attrs.password_hash = Some(hash_password(&password)?);
    }
    Ok(())
}

fn check(attrs: &UserAttributes, creating: bool) -> Result<()> {
    let mut violations = Violations::new();
    if creating || attrs.email.is_some() {
        if let Some(email) = violations.check(validate_required("email", attrs.email.as_deref())) {
            violations.check(validate_email("email", email.trim()));
        }
    }
    if creating || attrs.name.is_some() {
        if let Some(name) = violations.check(validate_required("name", attrs.name.as_deref())) {
            violations.check(validate_length("name", name.trim(), 1, 200));
        }
    }
    if creating || attrs.password.is_some() {
        if let Some(password) = violations.check(validate_required("password", attrs.password.as_deref())) {
            violations.check(validate_length("password", password, MIN_PASSWORD_LEN, 256));
        }
    }
    if let Some(Some(avatar)) = &attrs.avatar {
        violations.check(validate_url("avatar", avatar));
    }
    violations.finish()?;
    Ok(())
}

/// Lower-cased, trimmed email; unique across every company
pub(crate) fn unique_email(store: &crate::graph::GraphStore, email: &str, exclude: Option<Uuid>) -> Result<String> {
    let email = email.trim().to_lowercase();
    if Repository::<User>::new(store).exists_where("email", email.as_str(), exclude, false)? {
        return Err(ApiError::conflict(format!("email '{email}' is already registered")));
    }
    Ok(email)
}

/// Non-administrators may only assign selectable roles
fn check_roles(state: &AppState, ctx: &RequestContext, roles: &[Uuid]) -> Result<()> {
    if ctx.is_admin() {
        return Ok(());
    }
    let repo = Repository::<Role>::new(&state.store);
    let mut violations = Violations::new();
    for id in roles {
        match repo.load(*id)? {
            Some(role) if role.is_selectable => {}
            Some(role) => violations.push(ValidationError::Relationship {
                field: "roles".into(),
                reason: format!("role '{}' cannot be assigned", role.name),
            }),
            None => violations.push(ValidationError::Relationship {
                field: "roles".into(),
                reason: format!("roles '{id}' does not exist"),
            }),
        }
    }
    violations.finish()?;
    Ok(())
}

fn relationships(state: &AppState, ctx: &RequestContext, doc: &IncomingDocument<UserAttributes>, write: &mut WriteSet) -> Result<()> {
    if let Some(roles) = doc.relationships.get("roles") {
        check_roles(state, ctx, roles)?;
        write.relate("roles", roles.clone());
    }
    if let Some(company) = doc.one("company") {
        if !ctx.is_admin() {
            return Err(ApiError::forbidden("only administrators may move users between companies"));
        }
        write.relate_one("company", company);
    }
    Ok(())
}

impl CrudResource for User {
    type Create = UserAttributes;
    type Update = UserAttributes;

    fn precompute_create(attrs: &mut UserAttributes) -> Result<()> {
        digest(attrs, true)
    }

    fn precompute_update(attrs: &mut UserAttributes) -> Result<()> {
        digest(attrs, false)
    }

    fn prepare_create(state: &AppState, ctx: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        let mut write = WriteSet::new();
        relationships(state, ctx, &doc, &mut write)?;

        let attrs = doc.attributes;
        if let Some(email) = &attrs.email {
            write.set("email", unique_email(&state.store, email, None)?);
        }
        if let Some(name) = attrs.name {
            write.set("name", name.trim());
        }
        if let Some(hash) = attrs.password_hash {
            write.set("passwordHash", hash);
        }
        write.patch("title", attrs.title);
        write.patch("avatar", attrs.avatar);
        write.set("isActive", attrs.is_active.unwrap_or(true));
        Ok(write)
    }

    fn prepare_update(
        state: &AppState,
        ctx: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        let mut write = WriteSet::new();
        relationships(state, ctx, &doc, &mut write)?;

        let attrs = doc.attributes;
        if let Some(email) = &attrs.email {
            write.set("email", unique_email(&state.store, email, Some(current.id))?);
        }
        if let Some(name) = attrs.name {
            write.set("name", name.trim());
        }
        if let Some(hash) = attrs.password_hash {
            write.set("passwordHash", hash);
        }
        write.patch("title", attrs.title);
        write.patch("avatar", attrs.avatar);
        if let Some(active) = attrs.is_active {
            if current.id == ctx.user_id && !active {
                return Err(ApiError::conflict("cannot deactivate your own account"));
            }
            write.set("isActive", active);
        }
        Ok(write)
    }

    fn before_delete(_: &AppState, ctx: &RequestContext, current: &Self) -> Result<()> {
        if current.id == ctx.user_id {
            return Err(ApiError::conflict("cannot delete your own account"));
        }
        Ok(())
    }
}

/// The caller's own user record, without module permission checks
pub fn me(state: &AppState, ctx: &RequestContext) -> Result<User> {
    Repository::<User>::new(&state.store)
        .load(ctx.user_id)?
        .ok_or_else(|| ApiError::not_found(USERS.type_name, ctx.user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonapi::JsonApiSerializer;

    fn attrs(email: &str) -> UserAttributes {
        UserAttributes {
            email: Some(email.into()),
            name: Some("Ada".into()),
            password: Some("correct horse".into()),
            ..UserAttributes::default()
        }
    }

    #[test]
    fn short_password_is_rejected() {
        let mut short = attrs("ada@acme.test");
        short.password = Some("short".into());
        assert!(check(&short, true).is_err());
        assert!(check(&attrs("ada@acme.test"), true).is_ok());
        assert!(check(&UserAttributes::default(), false).is_ok());
    }

    #[test]
    fn passwords_are_hashed_without_the_write_lock() {
        let state = crate::testing::state();
        let _guard = state.store.lock_writes();

        let mut payload = attrs("ada@acme.test");
        digest(&mut payload, true).unwrap();
        assert!(payload.password.is_none());
        let hash = payload.password_hash.unwrap();
        assert!(crate::auth::password::verify_password("correct horse", &hash));

        let mut untouched = UserAttributes::default();
        digest(&mut untouched, false).unwrap();
        assert!(untouched.password_hash.is_none());
    }

    #[test]
    fn created_users_can_log_in() {
        let state = crate::testing::state();
        let company = Uuid::new_v4();
        let mut write = WriteSet::new();
        write.set("name", "Acme");
        Repository::<Company>::new(&state.store).create(company, write).unwrap();

        let ctx = RequestContext::new(Uuid::new_v4(), company, vec!["Administrator".into()]);
        let body = json!({ "data": { "type": "users", "attributes": {
            "email": "ada@acme.test", "name": "Ada", "password": "correct horse"
        } } });
        let user = RequestContext::sync_scope(ctx.clone(), || {
            crate::service::CrudService::<User>::new(&state).create(&ctx, body.to_string().as_bytes())
        })
        .unwrap();
        let hash = user.password_hash.unwrap();
        assert!(crate::auth::password::verify_password("correct horse", &hash));
    }

    #[test]
    fn email_is_unique_across_companies() {
        let state = crate::testing::state();
        let mut write = WriteSet::new();
        write.set("email", "ada@acme.test").set("name", "Ada");
        let id = Uuid::new_v4();
        Repository::<User>::new(&state.store).create(id, write).unwrap();

        let err = unique_email(&state.store, " ADA@acme.test ", None).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Conflict);
        assert_eq!(unique_email(&state.store, "ada@acme.test", Some(id)).unwrap(), "ada@acme.test");
    }

    #[test]
    fn password_hash_is_never_serialised() {
        let state = crate::testing::state();
        let mut write = WriteSet::new();
        write
            .set("email", "ada@acme.test")
            .set("name", "Ada")
            .set("passwordHash", hash_password("correct horse").unwrap());
        let user = Repository::<User>::new(&state.store).create(Uuid::new_v4(), write).unwrap();
        assert!(user.password_hash.is_some());

        let doc = JsonApiSerializer::new("").single(&user).unwrap();
        let body = serde_json::to_string(&doc).unwrap();
        assert!(!body.contains("passwordHash"));
        assert!(!body.contains("argon2"));
    }

    #[test]
    fn members_cannot_assign_unselectable_roles() {
        let state = crate::testing::state();
        let roles = Repository::<Role>::new(&state.store);
        let (open, closed) = (Uuid::new_v4(), Uuid::new_v4());
        for (id, name, selectable) in [(open, "Clerk", true), (closed, "Auditor", false)] {
            let mut write = WriteSet::new();
            write.set("name", name).set("isSelectable", selectable);
            roles.create(id, write).unwrap();
        }

        let member = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["CompanyAdministrator".into()]);
        assert!(check_roles(&state, &member, &[open]).is_ok());
        assert!(check_roles(&state, &member, &[open, closed]).is_err());
        let admin = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["Administrator".into()]);
        assert!(check_roles(&state, &admin, &[closed]).is_ok());
    }
}
