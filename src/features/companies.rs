use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::features::Feature;
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::permissions::{Action, PermissionService};
use crate::repository::WriteSet;
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{Violations, validate_length, validate_required};

static RELATIONSHIPS: [RelationshipDescriptor; 1] =
    [RelationshipDescriptor::many("features", "HAS_FEATURE", "features")];

pub static COMPANIES: ResourceDescriptor = ResourceDescriptor {
    type_name: "companies",
    endpoint: "companies",
    label: "Company",
    attributes: &["name", "logo", "createdAt", "updatedAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::OwnCompany,
    search_fields: &["name"],
    sortable: &["name", "createdAt", "updatedAt"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Company>),
};

#[derive(Debug, Clone)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub logo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub features: Vec<Feature>,
}

impl ApiEntity for Company {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &COMPANIES
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("name", json!(self.name)),
            ("logo", json!(self.logo)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![("features", Related::many(&self.features))]
    }
}

impl Entity for Company {
    fn resource() -> &'static ResourceDescriptor {
        &COMPANIES
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            logo: node.opt_string("logo")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            features: record.many("features")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CompanyAttributes {
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    logo: Option<Option<String>>,
}

fn check(attrs: &CompanyAttributes, creating: bool) -> Result<()> {
    let mut violations = Violations::new();
    if creating || attrs.name.is_some() {
        if let Some(name) = violations.check(validate_required("name", attrs.name.as_deref())) {
            violations.check(validate_length("name", name.trim(), 1, 200));
        }
    }
    violations.finish()?;
    Ok(())
}

impl CrudResource for Company {
    type Create = CompanyAttributes;
    type Update = CompanyAttributes;

    fn authorize(state: &AppState, ctx: &RequestContext, action: Action) -> Result<()> {
        match action {
            // scope limits members to their own company
            Action::Read => Ok(()),
            Action::Create | Action::Delete if !ctx.is_admin() => Err(ApiError::forbidden(
                format!("only administrators may {action} companies"),
            )),
            Action::Create | Action::Delete => Ok(()),
            Action::Update => {
                PermissionService::new(&state.store).authorize(ctx, COMPANIES.endpoint, action)
            }
        }
    }

    fn prepare_create(_: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        check(&doc.attributes, true)?;
        let mut write = WriteSet::new();
        if let Some(name) = doc.attributes.name {
            write.set("name", name.trim());
        }
        write.patch("logo", doc.attributes.logo);
        if let Some(features) = doc.relationships.get("features") {
            write.relate("features", features.clone());
        }
        Ok(write)
    }

    fn prepare_update(
        _: &AppState,
        ctx: &RequestContext,
        _: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        check(&doc.attributes, false)?;
        let mut write = WriteSet::new();
        if let Some(name) = doc.attributes.name {
            write.set("name", name.trim());
        }
        write.patch("logo", doc.attributes.logo);
        if let Some(features) = doc.relationships.get("features") {
            if !ctx.is_admin() {
                return Err(ApiError::forbidden("only administrators may change company features"));
            }
            write.relate("features", features.clone());
        }
        Ok(write)
    }

    fn before_delete(_: &AppState, ctx: &RequestContext, current: &Self) -> Result<()> {
        if current.id == ctx.company_id {
            return Err(ApiError::conflict("cannot delete the company you belong to"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_required_on_create_only() {
        assert!(check(&CompanyAttributes::default(), true).is_err());
        assert!(check(&CompanyAttributes::default(), false).is_ok());
        let blank = CompanyAttributes {
            name: Some("  ".into()),
            logo: None,
        };
        assert!(check(&blank, false).is_err());
    }

    #[test]
    fn members_cannot_create_companies() {
        let state = crate::testing::state();
        let member = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["CompanyAdministrator".into()]);
        assert!(Company::authorize(&state, &member, Action::Create).is_err());
        assert!(Company::authorize(&state, &member, Action::Read).is_ok());
        let admin = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), vec!["Administrator".into()]);
        assert!(Company::authorize(&state, &admin, Action::Delete).is_ok());
    }
}
