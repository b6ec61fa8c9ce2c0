use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::companies::Company;
use super::equipments::Equipment;
use crate::context::RequestContext;
use crate::error::Result;
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::repository::WriteSet;
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{Violations, validate_email, validate_length, validate_required, validate_url};

static RELATIONSHIPS: [RelationshipDescriptor; 2] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
    RelationshipDescriptor::many("equipments", "SUPPLIED_BY", "equipments").incoming(),
];

pub static SUPPLIERS: ResourceDescriptor = ResourceDescriptor {
    type_name: "suppliers",
    endpoint: "suppliers",
    label: "Supplier",
    attributes: &["name", "address", "email", "phone", "website", "createdAt", "updatedAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &["name", "email", "address"],
    sortable: &["name", "email", "createdAt", "updatedAt"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Supplier>),
};

#[derive(Debug, Clone)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub equipments: Vec<Equipment>,
}

impl ApiEntity for Supplier {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &SUPPLIERS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("name", json!(self.name)),
            ("address", json!(self.address)),
            ("email", json!(self.email)),
            ("phone", json!(self.phone)),
            ("website", json!(self.website)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("equipments", Related::many(&self.equipments)),
        ]
    }
}

impl Entity for Supplier {
    fn resource() -> &'static ResourceDescriptor {
        &SUPPLIERS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            address: node.opt_string("address")?,
            email: node.opt_string("email")?,
            phone: node.opt_string("phone")?,
            website: node.opt_string("website")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            company: record.single("company")?,
            equipments: record.many("equipments")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierAttributes {
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    website: Option<Option<String>>,
}

impl SupplierAttributes {
    fn write(self, creating: bool) -> Result<WriteSet> {
        let mut violations = Violations::new();
        if creating || self.name.is_some() {
            if let Some(name) = violations.check(validate_required("name", self.name.as_deref())) {
                violations.check(validate_length("name", name.trim(), 1, 200));
            }
        }
        if let Some(Some(email)) = &self.email {
            violations.check(validate_email("email", email.trim()));
        }
        if let Some(Some(website)) = &self.website {
            violations.check(validate_url("website", website.trim()));
        }
        violations.finish()?;

        let mut write = WriteSet::new();
        if let Some(name) = self.name {
            write.set("name", name.trim());
        }
        write.patch("address", self.address);
        write.patch("email", self.email.map(|e| e.map(|e| e.trim().to_lowercase())));
        write.patch("phone", self.phone);
        write.patch("website", self.website.map(|w| w.map(|w| w.trim().to_string())));
        Ok(write)
    }
}

impl CrudResource for Supplier {
    type Create = SupplierAttributes;
    type Update = SupplierAttributes;

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
