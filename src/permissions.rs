//! Module permissions.
//!
//! A module is an API endpoint. Access is decided from the caller's roles,
//! the grants stored on their role nodes and the features enabled for their
//! company.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::{label_iri, node_iri, prop_iri, rel_iri};
use crate::graph::{GraphStore, PropertyValue};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

/// Grants for one module as stored in a role's `permissions` attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulePermissions {
    pub read: bool,
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl ModulePermissions {
    pub const ALL: Self = Self {
        read: true,
        create: true,
        update: true,
        delete: true,
    };

    pub const READ_ONLY: Self = Self {
        read: true,
        create: false,
        update: false,
        delete: false,
    };

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Create => self.create,
            Action::Update => self.update,
            Action::Delete => self.delete,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            create: self.create || other.create,
            update: self.update || other.update,
            delete: self.delete || other.delete,
        }
    }
}

/// Module name to grants
pub type PermissionMap = BTreeMap<String, ModulePermissions>;

/// Whether a module is usable by the caller's company
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Core modules are always available
    Core,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default)]
pub struct Subject {
    pub is_admin: bool,
    pub is_company_admin: bool,
    pub grants: PermissionMap,
}

/// Pure access decision
pub fn decide(subject: &Subject, availability: Availability, module: &str, action: Action) -> bool {
    if subject.is_admin {
        return true;
    }
    if availability == Availability::Disabled {
        return false;
    }
    if subject.is_company_admin {
        return true;
    }
    subject
        .grants
        .get(module)
        .is_some_and(|grants| grants.allows(action))
}

/// Loads roles, grants and company features from the graph
pub struct PermissionService<'a> {
    store: &'a GraphStore,
}

impl<'a> PermissionService<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    /// `Ok(())` when `ctx` may perform `action` on `module`, 403 otherwise
    pub fn authorize(&self, ctx: &RequestContext, module: &str, action: Action) -> Result<()> {
        let subject = self.subject(ctx)?;
        let availability = if subject.is_admin {
            Availability::Core
        } else {
            self.availability(ctx.company_id, module)?
        };

        if decide(&subject, availability, module, action) {
            Ok(())
        } else {
            tracing::debug!(user = %ctx.user_id, module, action = %action, "permission denied");
            Err(ApiError::forbidden(format!("not allowed to {action} {module}")))
        }
    }

    pub fn subject(&self, ctx: &RequestContext) -> Result<Subject> {
        let mut subject = Subject {
            is_admin: ctx.is_admin(),
            is_company_admin: ctx.is_company_admin(),
            grants: PermissionMap::new(),
        };
        if subject.is_admin || subject.is_company_admin {
            return Ok(subject);
        }

        let user = node_iri("User", ctx.user_id);
        let query = format!(
            "SELECT ?perm WHERE {{ <{user}> <{}> ?role . ?role <{}> ?perm . }}",
            rel_iri("MEMBER_OF"),
            prop_iri("permissions"),
        );
        for row in self.store.select(&query)? {
            let Some(PropertyValue::String(raw)) = row.value("perm") else {
                continue;
            };
            let map: PermissionMap = match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring unreadable role permissions");
                    continue;
                }
            };
            for (module, grants) in map {
                let entry = subject.grants.entry(module).or_default();
                *entry = entry.union(grants);
            }
        }
        Ok(subject)
    }

    /// Modules without a node are treated as core
    pub fn availability(&self, company_id: Uuid, module: &str) -> Result<Availability> {
        let name = PropertyValue::from(module).to_sparql();
        let query = format!(
            "SELECT ?m ?core WHERE {{ ?m a <{}> ; <{}> {name} . OPTIONAL {{ ?m <{}> ?core }} }} LIMIT 1",
            label_iri("Module"),
            prop_iri("name"),
            prop_iri("isCore"),
        );
        let rows = self.store.select(&query)?;
        let Some(row) = rows.first() else {
            return Ok(Availability::Core);
        };
        if row.value("core") == Some(PropertyValue::Boolean(true)) {
            return Ok(Availability::Core);
        }
        let Some(module_iri) = row.iri("m") else {
            return Ok(Availability::Core);
        };

        let company = node_iri("Company", company_id);
        let enabled = self.store.ask(&format!(
            "ASK {{ <{company}> <{}> ?f . <{module_iri}> <{}> ?f . }}",
            rel_iri("HAS_FEATURE"),
            rel_iri("PART_OF"),
        ))?;
        Ok(if enabled {
            Availability::Enabled
        } else {
            Availability::Disabled
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(grants: &[(&str, ModulePermissions)]) -> Subject {
        Subject {
            grants: grants
                .iter()
                .map(|(module, g)| (module.to_string(), *g))
                .collect(),
            ..Subject::default()
        }
    }

    #[test]
    fn administrator_bypasses_features() {
        let admin = Subject {
            is_admin: true,
            ..Subject::default()
        };
        assert!(decide(&admin, Availability::Disabled, "loans", Action::Delete));
    }

    #[test]
    fn company_admin_needs_enabled_module() {
        let company_admin = Subject {
            is_company_admin: true,
            ..Subject::default()
        };
        assert!(decide(&company_admin, Availability::Enabled, "loans", Action::Delete));
        assert!(!decide(&company_admin, Availability::Disabled, "loans", Action::Read));
    }

    #[test]
    fn members_use_grants() {
        let subject = member(&[("loans", ModulePermissions::READ_ONLY)]);
        assert!(decide(&subject, Availability::Enabled, "loans", Action::Read));
        assert!(!decide(&subject, Availability::Enabled, "loans", Action::Create));
        assert!(!decide(&subject, Availability::Core, "employees", Action::Read));
    }

    #[test]
    fn grants_parse_with_missing_flags() {
        let map: PermissionMap =
            serde_json::from_str(r#"{"loans":{"read":true,"create":true}}"#).unwrap();
        assert_eq!(
            map["loans"],
            ModulePermissions {
                read: true,
                create: true,
                update: false,
                delete: false
            }
        );
        assert!(ModulePermissions::READ_ONLY.union(map["loans"]).allows(Action::Create));
    }

    #[test]
    fn action_strings() {
        assert_eq!(Action::Update.to_string(), "update");
        assert_eq!("delete".parse::<Action>().unwrap(), Action::Delete);
    }
}
