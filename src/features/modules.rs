use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::features::Feature;
use crate::context::RequestContext;
use crate::error::Result;
use crate::jsonapi::IncomingDocument;
use crate::mapper::{MappingError, Record};
use crate::permissions::Action;
use crate::registry::MODELS;
use crate::repository::WriteSet;
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::{CrudResource, admin_writes};
use crate::state::AppState;
use crate::validation::{ValidationError, Violations, validate_required};

static RELATIONSHIPS: [RelationshipDescriptor; 1] =
    [RelationshipDescriptor::one("feature", "PART_OF", "features")];

pub static MODULES: ResourceDescriptor = ResourceDescriptor {
    type_name: "modules",
    endpoint: "modules",
    label: "Module",
    attributes: &["name", "isCore"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Global,
    search_fields: &["name"],
    sortable: &["name"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Module>),
};

/// A permission module; its name is an API endpoint
#[derive(Debug, Clone)]
pub struct Module {
    pub id: Uuid,
    pub name: String,
    pub is_core: bool,
    pub feature: Option<Feature>,
}

impl ApiEntity for Module {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &MODULES
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([("name", json!(self.name)), ("isCore", json!(self.is_core))])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![("feature", Related::one(&self.feature))]
    }
}

impl Entity for Module {
    fn resource() -> &'static ResourceDescriptor {
        &MODULES
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            is_core: node.flag("isCore")?,
            feature: record.single("feature")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAttributes {
    name: Option<String>,
    is_core: Option<bool>,
}

fn write(doc: IncomingDocument<ModuleAttributes>, creating: bool) -> Result<WriteSet> {
    let feature = doc.one("feature");
    let attrs = doc.attributes;
    let mut violations = Violations::new();
    if creating || attrs.name.is_some() {
        if let Some(name) = violations.check(validate_required("name", attrs.name.as_deref())) {
            if MODELS.by_endpoint(name.trim()).is_err() {
                violations.push(ValidationError::NotAllowed {
                    field: "name".into(),
                    allowed: "a registered endpoint".into(),
                });
            }
        }
    }
    violations.finish()?;

    let mut write = WriteSet::new();
    if let Some(name) = attrs.name {
        write.set("name", name.trim());
    }
    if let Some(flag) = attrs.is_core.or(creating.then_some(false)) {
        write.set("isCore", flag);
    }
    if let Some(feature) = feature {
        write.relate_one("feature", feature);
    }
    Ok(write)
}

impl CrudResource for Module {
    type Create = ModuleAttributes;
    type Update = ModuleAttributes;

    fn authorize(_: &AppState, ctx: &RequestContext, action: Action) -> Result<()> {
        admin_writes(ctx, action, MODULES.type_name)
    }

    fn prepare_create(_: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        write(doc, true)
    }

    fn prepare_update(
        _: &AppState,
        _: &RequestContext,
        _: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        write(doc, false)
    }
}
