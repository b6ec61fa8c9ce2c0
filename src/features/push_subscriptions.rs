use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::users::User;
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::node_iri;
use crate::jsonapi::IncomingDocument;
use crate::mapper::{MappingError, Record};
use crate::permissions::Action;
use crate::repository::{Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, NoAttributes, Operations};
use crate::state::AppState;
use crate::validation::{Violations, validate_length, validate_required, validate_url};

static RELATIONSHIPS: [RelationshipDescriptor; 1] =
    [RelationshipDescriptor::one("user", "SUBSCRIBED_BY", "users").read_only()];

pub static PUSH_SUBSCRIPTIONS: ResourceDescriptor = ResourceDescriptor {
    type_name: "push-subscriptions",
    endpoint: "push-subscriptions",
    label: "PushSubscription",
    attributes: &["endpoint", "p256dh", "auth", "createdAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Owner("user"),
    search_fields: &[],
    sortable: &["createdAt"],
    default_sort: "createdAt",
    persisted: true,
    from_record: Some(boxed_from_record::<PushSubscription>),
};

/// A browser push endpoint registered by the caller
#[derive(Debug, Clone)]
pub struct PushSubscription {
    pub id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
    pub user: Option<User>,
}

impl ApiEntity for PushSubscription {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &PUSH_SUBSCRIPTIONS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("endpoint", json!(self.endpoint)),
            ("p256dh", json!(self.p256dh)),
            ("auth", json!(self.auth)),
            ("createdAt", json!(self.created_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![("user", Related::one(&self.user))]
    }
}

impl Entity for PushSubscription {
    fn resource() -> &'static ResourceDescriptor {
        &PUSH_SUBSCRIPTIONS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            endpoint: node.string("endpoint")?,
            p256dh: node.string("p256dh")?,
            auth: node.string("auth")?,
            created_at: node.datetime("createdAt")?,
            user: record.single("user")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionAttributes {
    endpoint: Option<String>,
    p256dh: Option<String>,
    auth: Option<String>,
}

impl CrudResource for PushSubscription {
    type Create = SubscriptionAttributes;
    type Update = NoAttributes;

    const OPERATIONS: Operations = Operations::NO_UPDATE;
    const AUDITED: bool = false;

    fn authorize(_: &AppState, _: &RequestContext, action: Action) -> Result<()> {
        match action {
            Action::Update => Err(ApiError::forbidden("push subscriptions cannot be updated")),
            _ => Ok(()),
        }
    }

    fn prepare_create(state: &AppState, ctx: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        let attrs = doc.attributes;
        let mut violations = Violations::new();
        if let Some(endpoint) = violations.check(validate_required("endpoint", attrs.endpoint.as_deref())) {
            violations.check(validate_url("endpoint", endpoint.trim()));
        }
        for (field, value) in [("p256dh", &attrs.p256dh), ("auth", &attrs.auth)] {
            if let Some(value) = violations.check(validate_required(field, value.as_deref())) {
                violations.check(validate_length(field, value.trim(), 1, 512));
            }
        }
        violations.finish()?;

        let endpoint = attrs.endpoint.unwrap_or_default().trim().to_string();
        if Repository::<PushSubscription>::new(&state.store).exists_where("endpoint", endpoint.as_str(), None, true)? {
            return Err(ApiError::conflict("this endpoint is already subscribed"));
        }

        let mut write = WriteSet::new();
        write
            .set("endpoint", endpoint)
            .set("p256dh", attrs.p256dh.unwrap_or_default().trim())
            .set("auth", attrs.auth.unwrap_or_default().trim())
            .relate_node("user", node_iri("User", ctx.user_id));
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CrudService;
    use serde_json::json;

    fn body(endpoint: &str) -> String {
        json!({ "data": { "type": "push-subscriptions", "attributes": {
            "endpoint": endpoint, "p256dh": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA", "auth": "tBHItJI5svbpez7KI4CCXg"
        }}})
        .to_string()
    }

    #[test]
    fn subscriptions_belong_to_their_owner() {
        let state = crate::testing::state();
        let mut write = WriteSet::new();
        let owner_id = Uuid::new_v4();
        write.set("email", "ada@acme.test").set("name", "Ada");
        Repository::<User>::new(&state.store).create(owner_id, write).unwrap();

        let owner = RequestContext::new(owner_id, Uuid::new_v4(), vec![]);
        let other = RequestContext::new(Uuid::new_v4(), owner.company_id, vec![]);
        let service = CrudService::<PushSubscription>::new(&state);

        let created = RequestContext::sync_scope(owner.clone(), || {
            let created = service.create(&owner, body("https://push.test/abc").as_bytes()).unwrap();
            assert_eq!(created.user.as_ref().map(|u| u.id), Some(owner_id));
            let err = service.create(&owner, body("https://push.test/abc").as_bytes()).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::Conflict);
            created
        });

        RequestContext::sync_scope(other.clone(), || {
            let (page, _) = service.list(&other, &[]).unwrap();
            assert_eq!(page.total, 0);
            let err = service.delete(&other, created.id).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::NotFound);
        });
    }

    #[test]
    fn keys_are_required() {
        let state = crate::testing::state();
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec![]);
        let body = json!({ "data": { "type": "push-subscriptions", "attributes": { "endpoint": "https://push.test/x" } } }).to_string();
        let err = RequestContext::sync_scope(ctx.clone(), || {
            CrudService::<PushSubscription>::new(&state).create(&ctx, body.as_bytes())
        })
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationFailed);
    }
}
