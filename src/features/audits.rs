use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Value, json};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::companies::Company;
use super::users::User;
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::GraphStore;
use crate::graph::sanitize::{escape_literal, node_iri, prop_iri};
use crate::mapper::{MappingError, Record};
use crate::repository::{NODE_VAR, Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, NoAttributes, Operations};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AuditType {
    Create,
    Update,
    Delete,
    Return,
}

static RELATIONSHIPS: [RelationshipDescriptor; 3] = [
    RelationshipDescriptor::one("user", "PERFORMED_BY", "users").read_only(),
    RelationshipDescriptor::dynamic("audited", "AUDITS"),
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
];

pub static AUDITS: ResourceDescriptor = ResourceDescriptor {
    type_name: "audits",
    endpoint: "audits",
    label: "Audit",
    attributes: &["auditType", "auditedType", "auditedId", "createdAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &[],
    sortable: &["createdAt", "auditType", "auditedType"],
    default_sort: "createdAt",
    persisted: true,
    from_record: Some(boxed_from_record::<Audit>),
};

#[derive(Debug)]
pub struct Audit {
    pub id: Uuid,
    pub audit_type: String,
    pub audited_type: String,
    /// Kept after the audited node is deleted
    pub audited_id: String,
    pub created_at: DateTime<Utc>,
    pub user: Option<User>,
    pub audited: Option<Box<dyn ApiEntity>>,
    pub company: Option<Company>,
}

impl ApiEntity for Audit {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &AUDITS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("auditType", json!(self.audit_type)),
            ("auditedType", json!(self.audited_type)),
            ("auditedId", json!(self.audited_id)),
            ("createdAt", json!(self.created_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("user", Related::one(&self.user)),
            ("audited", Related::boxed(&self.audited)),
            ("company", Related::one(&self.company)),
        ]
    }
}

impl Entity for Audit {
    fn resource() -> &'static ResourceDescriptor {
        &AUDITS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            audit_type: node.string("auditType")?,
            audited_type: node.string("auditedType")?,
            audited_id: node.string("auditedId")?,
            created_at: node.datetime("createdAt")?,
            user: record.single("user")?,
            audited: record.dynamic("audited")?,
            company: record.single("company")?,
        })
    }
}

impl CrudResource for Audit {
    type Create = NoAttributes;
    type Update = NoAttributes;

    const OPERATIONS: Operations = Operations::READ_ONLY;
    const EXTRA_FILTERS: &'static [&'static str] = &["audited"];
    const AUDITED: bool = false;

    fn custom_filter(name: &str, value: &str) -> Result<Option<String>> {
        let id = Uuid::parse_str(value).map_err(|_| {
            ApiError::invalid_parameter(format!("filter[{name}]"), format!("'{value}' is not a valid id"))
        })?;
        Ok(Some(format!(
            "EXISTS {{ {NODE_VAR} <{}> \"{}\" }}",
            prop_iri("auditedId"),
            escape_literal(&id.to_string())
        )))
    }
}

/// Write an audit entry for `entity`.
///
/// With `exists` unset (deletes) the entry keeps the type and id of the
/// entity but no edge to it.
pub fn record(
    store: &GraphStore,
    ctx: &RequestContext,
    kind: AuditType,
    entity: &dyn ApiEntity,
    exists: bool,
) -> Result<()> {
    let descriptor = entity.descriptor();
    let audited_id = entity.id();

    let mut write = WriteSet::new();
    write
        .set("auditType", kind.to_string())
        .set("auditedType", descriptor.type_name)
        .set("auditedId", audited_id.as_str())
        .relate_node("user", node_iri("User", ctx.user_id))
        .relate_node("company", node_iri("Company", ctx.company_id));
    if exists && descriptor.persisted {
        if let Ok(id) = Uuid::parse_str(&audited_id) {
            write.relate_node("audited", node_iri(descriptor.label, id));
        }
    }

    let id = Uuid::new_v4();
    Repository::<Audit>::new(store).create(id, write)?;
    tracing::debug!(audit = %id, kind = %kind, audited = descriptor.type_name, audited_id, "audit recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::suppliers::Supplier;
    use crate::service::CrudService;
    use serde_json::json;

    #[test]
    fn audits_follow_writes() {
        let state = crate::testing::state();
        let company = Uuid::new_v4();
        let mut write = WriteSet::new();
        write.set("name", "Acme");
        Repository::<Company>::new(&state.store).create(company, write).unwrap();
        let ctx = RequestContext::new(Uuid::new_v4(), company, vec!["Administrator".into()]);

        RequestContext::sync_scope(ctx.clone(), || {
            let suppliers = CrudService::<Supplier>::new(&state);
            let body = json!({ "data": { "type": "suppliers", "attributes": { "name": "Bosch" } } }).to_string();
            let supplier = suppliers.create(&ctx, body.as_bytes()).unwrap();

            let audits = CrudService::<Audit>::new(&state);
            let params = vec![("filter[audited]".to_string(), supplier.id.to_string())];
            let (page, _) = audits.list(&ctx, &params).unwrap();
            assert_eq!(page.total, 1);
            let entry = &page.items[0];
            assert_eq!(entry.audit_type, "create");
            assert_eq!(entry.audited_type, "suppliers");
            let audited = entry.audited.as_ref().expect("audited edge");
            assert_eq!(audited.id(), supplier.id.to_string());
            assert_eq!(audited.descriptor().type_name, "suppliers");

            suppliers.delete(&ctx, supplier.id).unwrap();
            let (page, _) = audits.list(&ctx, &params).unwrap();
            assert_eq!(page.total, 2);
            assert!(page.items.iter().all(|a| a.audited.is_none()));
        });
    }

    #[test]
    fn audited_filter_needs_an_id() {
        let err = Audit::custom_filter("audited", "nope").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidParameter);
    }
}
