use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::modules::Module;
use crate::context::RequestContext;
use crate::error::Result;
use crate::jsonapi::IncomingDocument;
use crate::mapper::{MappingError, Record};
use crate::permissions::Action;
use crate::repository::WriteSet;
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, admin_writes};
use crate::state::AppState;
use crate::validation::{Violations, validate_required};

static RELATIONSHIPS: [RelationshipDescriptor; 1] =
    [RelationshipDescriptor::many("modules", "PART_OF", "modules").incoming()];

pub static FEATURES: ResourceDescriptor = ResourceDescriptor {
    type_name: "features",
    endpoint: "features",
    label: "Feature",
    attributes: &["name", "isProduction", "isCore"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Global,
    search_fields: &["name"],
    sortable: &["name"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Feature>),
};

/// A switchable group of modules
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: Uuid,
    pub name: String,
    pub is_production: bool,
    pub is_core: bool,
    pub modules: Vec<Module>,
}

impl ApiEntity for Feature {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &FEATURES
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("name", json!(self.name)),
            ("isProduction", json!(self.is_production)),
            ("isCore", json!(self.is_core)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![("modules", Related::many(&self.modules))]
    }
}

impl Entity for Feature {
    fn resource() -> &'static ResourceDescriptor {
        &FEATURES
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            is_production: node.flag("isProduction")?,
            is_core: node.flag("isCore")?,
            modules: record.many("modules")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAttributes {
    name: Option<String>,
    is_production: Option<bool>,
    is_core: Option<bool>,
}

impl FeatureAttributes {
    fn write(self, creating: bool) -> Result<WriteSet> {
        let mut violations = Violations::new();
        if creating || self.name.is_some() {
            violations.check(validate_required("name", self.name.as_deref()));
        }
        violations.finish()?;

        let mut write = WriteSet::new();
        if let Some(name) = self.name {
            write.set("name", name.trim());
        }
        if let Some(flag) = self.is_production.or(creating.then_some(false)) {
            write.set("isProduction", flag);
        }
        if let Some(flag) = self.is_core.or(creating.then_some(false)) {
            write.set("isCore", flag);
        }
        Ok(write)
    }
}

impl CrudResource for Feature {
    type Create = FeatureAttributes;
    type Update = FeatureAttributes;

    fn authorize(_: &AppState, ctx: &RequestContext, action: Action) -> Result<()> {
        admin_writes(ctx, action, FEATURES.type_name)
    }

    fn prepare_create(_: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        doc.attributes.write(true)
    }

    fn prepare_update(
        _: &AppState,
        _: &RequestContext,
        _: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        doc.attributes.write(false)
    }
}
