use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Value, json};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::users::User;
use crate::context::{COMPANY_ADMINISTRATOR, RequestContext};
use crate::error::{ApiError, Result};
use crate::graph::sanitize::{label_iri, node_iri, prop_iri, rel_iri};
use crate::graph::{GraphStore, PropertyValue, QueryBuilder};
use crate::mapper::{MappingError, Record};
use crate::permissions::Action;
use crate::repository::{COMPANY_EDGE, Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, NoAttributes, Operations};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    LoanCreated,
    LoanReturned,
}

static RELATIONSHIPS: [RelationshipDescriptor; 2] = [
    RelationshipDescriptor::one("recipient", "NOTIFIES", "users").read_only(),
    RelationshipDescriptor::one("actor", "TRIGGERED_BY", "users").read_only(),
];

pub static NOTIFICATIONS: ResourceDescriptor = ResourceDescriptor {
    type_name: "notifications",
    endpoint: "notifications",
    label: "Notification",
    attributes: &["notificationType", "message", "isRead", "createdAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Owner("recipient"),
    search_fields: &["message"],
    sortable: &["createdAt", "isRead", "notificationType"],
    default_sort: "createdAt",
    persisted: true,
    from_record: Some(boxed_from_record::<Notification>),
};

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub notification_type: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub recipient: Option<User>,
    pub actor: Option<User>,
}

impl ApiEntity for Notification {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &NOTIFICATIONS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("notificationType", json!(self.notification_type)),
            ("message", json!(self.message)),
            ("isRead", json!(self.is_read)),
            ("createdAt", json!(self.created_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("recipient", Related::one(&self.recipient)),
            ("actor", Related::one(&self.actor)),
        ]
    }
}

impl Entity for Notification {
    fn resource() -> &'static ResourceDescriptor {
        &NOTIFICATIONS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            notification_type: node.string("notificationType")?,
            message: node.string("message")?,
            is_read: node.flag("isRead")?,
            created_at: node.datetime("createdAt")?,
            recipient: record.single("recipient")?,
            actor: record.single("actor")?,
        })
    }
}

impl CrudResource for Notification {
    type Create = NoAttributes;
    type Update = NoAttributes;

    const OPERATIONS: Operations = Operations {
        create: false,
        update: false,
        ..Operations::ALL
    };
    const AUDITED: bool = false;

    /// Scope alone decides: callers only ever see their own notifications
    fn authorize(_: &AppState, _: &RequestContext, action: Action) -> Result<()> {
        match action {
            Action::Read | Action::Delete => Ok(()),
            Action::Create | Action::Update => Err(ApiError::forbidden(format!(
                "notifications cannot be {action}d by clients"
            ))),
        }
    }
}

/// Active company administrators of `company`
fn company_admins(store: &GraphStore, company: Uuid) -> Result<Vec<String>> {
    let query = QueryBuilder::select()
        .distinct()
        .variable("?user")
        .pattern(format!("?user a <{}>", label_iri("User")))
        .pattern(format!(
            "?user <{}> <{}>",
            rel_iri(COMPANY_EDGE),
            node_iri("Company", company)
        ))
        .pattern(format!("?user <{}> ?role", rel_iri("MEMBER_OF")))
        .pattern(format!(
            "?role <{}> {}",
            prop_iri("name"),
            PropertyValue::from(COMPANY_ADMINISTRATOR).to_sparql()
        ))
        .filter(format!(
            "NOT EXISTS {{ ?user <{}> false }}",
            prop_iri("isActive")
        ))
        .order_by("?user")
        .build();
    Ok(store
        .select(&query)?
        .iter()
        .filter_map(|row| row.iri("user").map(str::to_string))
        .collect())
}

/// Notify every company administrator of the caller's company; returns how many were notified
pub fn notify_company_admins(
    store: &GraphStore,
    ctx: &RequestContext,
    kind: NotificationType,
    message: &str,
) -> Result<usize> {
    let recipients = company_admins(store, ctx.company_id)?;
    let repo = Repository::<Notification>::new(store);
    let actor = node_iri("User", ctx.user_id);
    for recipient in &recipients {
        let mut write = WriteSet::new();
        write
            .set("notificationType", kind.to_string())
            .set("message", message)
            .set("isRead", false)
            .relate_node("recipient", recipient.clone())
            .relate_node("actor", actor.clone());
        repo.create(Uuid::new_v4(), write)?;
    }
    tracing::debug!(kind = %kind, recipients = recipients.len(), "notifications created");
    Ok(recipients.len())
}

/// Mark one of the caller's notifications as read
pub fn mark_read(state: &AppState, ctx: &RequestContext, id: Uuid) -> Result<Notification> {
    Notification::authorize(state, ctx, Action::Read)?;
    let repo = Repository::<Notification>::new(&state.store);
    let _guard = state.store.lock_writes();
    let current = repo.get(id)?;
    if current.is_read {
        return Ok(current);
    }
    let mut write = WriteSet::new();
    write.set("isRead", true);
    repo.update(id, write)
}
