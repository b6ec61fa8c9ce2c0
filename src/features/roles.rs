use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::permissions::{Action, PermissionMap};
use crate::registry::MODELS;
use crate::repository::{Repository, WriteSet};
use crate::resource::{ApiEntity, Entity, ResourceDescriptor, Scope, boxed_from_record};
use crate::service::{CrudResource, admin_writes};
use crate::state::AppState;
use crate::validation::{ValidationError, Violations, validate_length, validate_required};

pub static ROLES: ResourceDescriptor = ResourceDescriptor {
    type_name: "roles",
    endpoint: "roles",
    label: "Role",
    attributes: &["name", "description", "isSelectable", "permissions"],
    relationships: &[],
    scope: Scope::Global,
    search_fields: &["name", "description"],
    sortable: &["name"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Role>),
};

#[derive(Debug, Clone)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Non-administrators may only hand out selectable roles
    pub is_selectable: bool,
    pub permissions: PermissionMap,
}

impl ApiEntity for Role {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &ROLES
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("name", json!(self.name)),
            ("description", json!(self.description)),
            ("isSelectable", json!(self.is_selectable)),
            ("permissions", json!(self.permissions)),
        ])
    }
}

impl Entity for Role {
    fn resource() -> &'static ResourceDescriptor {
        &ROLES
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        let permissions = match node.json("permissions")? {
            Value::Null => PermissionMap::new(),
            value => serde_json::from_value(value).map_err(|err| MappingError::InvalidJson {
                label: node.label.clone(),
                field: "permissions".into(),
                reason: err.to_string(),
            })?,
        };
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            description: node.opt_string("description")?,
            is_selectable: node.flag("isSelectable")?,
            permissions,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAttributes {
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    description: Option<Option<String>>,
    is_selectable: Option<bool>,
    permissions: Option<PermissionMap>,
}

/// Grants may only name registered endpoints
fn check_permissions(permissions: &PermissionMap, violations: &mut Violations) {
    for module in permissions.keys() {
        if MODELS.by_endpoint(module).is_err() {
            violations.push(ValidationError::NotAllowed {
                field: "permissions".into(),
                allowed: format!("registered modules ('{module}' is unknown)"),
            });
        }
    }
}

fn write(state: &AppState, id: Option<Uuid>, attrs: RoleAttributes, creating: bool) -> Result<WriteSet> {
    let mut violations = Violations::new();
    if creating || attrs.name.is_some() {
        if let Some(name) = violations.check(validate_required("name", attrs.name.as_deref())) {
            violations.check(validate_length("name", name.trim(), 1, 100));
        }
    }
    if let Some(permissions) = &attrs.permissions {
        check_permissions(permissions, &mut violations);
    }
    violations.finish()?;

    if let Some(name) = &attrs.name {
        let taken = Repository::<Role>::new(&state.store).exists_where("name", name.trim(), id, false)?;
        if taken {
            return Err(ApiError::conflict(format!("role '{}' already exists", name.trim())));
        }
    }

    let mut write = WriteSet::new();
    if let Some(name) = attrs.name {
        write.set("name", name.trim());
    }
    write.patch("description", attrs.description);
    if let Some(flag) = attrs.is_selectable.or(creating.then_some(false)) {
        write.set("isSelectable", flag);
    }
    if let Some(permissions) = attrs.permissions.or_else(|| creating.then(PermissionMap::new)) {
        let raw = serde_json::to_string(&permissions)
            .map_err(|err| ApiError::internal(format!("failed to encode permissions: {err}")))?;
        write.set("permissions", raw);
    }
    Ok(write)
}

impl CrudResource for Role {
    type Create = RoleAttributes;
    type Update = RoleAttributes;

    fn authorize(_: &AppState, ctx: &RequestContext, action: Action) -> Result<()> {
        admin_writes(ctx, action, ROLES.type_name)
    }

    fn prepare_create(state: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        write(state, None, doc.attributes, true)
    }

    fn prepare_update(
        state: &AppState,
        _: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        write(state, Some(current.id), doc.attributes, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::ModulePermissions;

    #[test]
    fn unknown_modules_are_rejected() {
        crate::features::register_all().unwrap();
        let mut permissions = PermissionMap::new();
        permissions.insert("loans".into(), ModulePermissions::ALL);
        let mut violations = Violations::new();
        check_permissions(&permissions, &mut violations);
        assert!(violations.is_empty());

        permissions.insert("spaceships".into(), ModulePermissions::READ_ONLY);
        check_permissions(&permissions, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn duplicate_names_conflict() {
        let state = crate::testing::state();
        let attrs = || RoleAttributes {
            name: Some("Manager".into()),
            ..RoleAttributes::default()
        };
        let write1 = write(&state, None, attrs(), true).unwrap();
        Repository::<Role>::new(&state.store)
            .create(Uuid::new_v4(), write1)
            .unwrap();
        let err = write(&state, None, attrs(), true).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Conflict);
    }
}
