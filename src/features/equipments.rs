use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::companies::Company;
use super::loans::{self, Loan};
use super::suppliers::Supplier;
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::{node_iri, prop_iri};
use crate::graph::{Direction, GraphStore, PropertyValue, QueryBuilder};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::repository::{COMPANY_EDGE, NODE_VAR, Repository, WriteSet, apply_scope};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{
    Violations, validate_date_order, validate_length, validate_required, validate_url,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Available,
    OnLoan,
    Maintenance,
    Retired,
}

static RELATIONSHIPS: [RelationshipDescriptor; 3] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
    RelationshipDescriptor::one("supplier", "SUPPLIED_BY", "suppliers"),
    RelationshipDescriptor::many("loans", "LOAN_OF", "loans").incoming(),
];

pub static EQUIPMENTS: ResourceDescriptor = ResourceDescriptor {
    type_name: "equipments",
    endpoint: "equipments",
    label: "Equipment",
    attributes: &[
        "name",
        "barcode",
        "description",
        "manufacturer",
        "model",
        "category",
        "imageUrl",
        "status",
        "purchaseDate",
        "warrantyExpiration",
        "createdAt",
        "updatedAt",
    ],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &["name", "barcode", "manufacturer", "model", "category"],
    sortable: &["name", "barcode", "category", "status", "purchaseDate", "createdAt", "updatedAt"],
    default_sort: "name",
    persisted: true,
    from_record: Some(boxed_from_record::<Equipment>),
};

#[derive(Debug, Clone)]
pub struct Equipment {
    pub id: Uuid,
    pub name: String,
    pub barcode: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub status: EquipmentStatus,
    pub purchase_date: Option<DateTime<Utc>>,
    pub warranty_expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub supplier: Option<Supplier>,
    pub loans: Vec<Loan>,
}

impl ApiEntity for Equipment {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &EQUIPMENTS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("name", json!(self.name)),
            ("barcode", json!(self.barcode)),
            ("description", json!(self.description)),
            ("manufacturer", json!(self.manufacturer)),
            ("model", json!(self.model)),
            ("category", json!(self.category)),
            ("imageUrl", json!(self.image_url)),
            ("status", json!(self.status)),
            ("purchaseDate", json!(self.purchase_date)),
            ("warrantyExpiration", json!(self.warranty_expiration)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("supplier", Related::one(&self.supplier)),
            ("loans", Related::many(&self.loans)),
        ]
    }
}

impl Entity for Equipment {
    fn resource() -> &'static ResourceDescriptor {
        &EQUIPMENTS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        let raw = node.string("status")?;
        let status = raw.parse().map_err(|_| MappingError::TypeMismatch {
            label: node.label.clone(),
            field: "status".into(),
            expected: "equipment status",
            found: "string",
        })?;
        Ok(Self {
            id: node.id,
            name: node.string("name")?,
            barcode: node.opt_string("barcode")?,
            description: node.opt_string("description")?,
            manufacturer: node.opt_string("manufacturer")?,
            model: node.opt_string("model")?,
            category: node.opt_string("category")?,
            image_url: node.opt_string("imageUrl")?,
            status,
            purchase_date: node.opt_datetime("purchaseDate")?,
            warranty_expiration: node.opt_datetime("warrantyExpiration")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            company: record.single("company")?,
            supplier: record.single("supplier")?,
            loans: record.many("loans")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentAttributes {
    name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    barcode: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    manufacturer: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    model: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    category: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    image_url: Option<Option<String>>,
    status: Option<EquipmentStatus>,
    #[serde(default, deserialize_with = "nullable")]
    purchase_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    warranty_expiration: Option<Option<DateTime<Utc>>>,
}

/// Whether another equipment of `company` carries `barcode`
pub fn barcode_taken(store: &GraphStore, company: Uuid, barcode: &str, exclude: Option<Uuid>) -> Result<bool> {
    let mut query = apply_scope(QueryBuilder::ask(), &EQUIPMENTS, NODE_VAR, None)
        .pattern(format!(
            "{NODE_VAR} <{}> {}",
            prop_iri("barcode"),
            PropertyValue::from(barcode).to_sparql()
        ))
        .edge(
            NODE_VAR,
            COMPANY_EDGE,
            Direction::Outgoing,
            &format!("<{}>", node_iri("Company", company)),
        );
    if let Some(id) = exclude {
        query = query.filter(format!("{NODE_VAR} != <{}>", Repository::<Equipment>::iri(id)));
    }
    Ok(store.ask(&query.build())?)
}

/// Status transitions a client may request directly
fn check_status(current: Option<EquipmentStatus>, requested: EquipmentStatus) -> Result<()> {
    if requested == EquipmentStatus::OnLoan {
        return Err(ApiError::conflict("equipment goes on loan by creating a loan"));
    }
    if current == Some(EquipmentStatus::OnLoan) && requested != EquipmentStatus::OnLoan {
        return Err(ApiError::conflict("equipment on loan is released by returning the loan"));
    }
    Ok(())
}

fn write(state: &AppState, ctx: &RequestContext, doc: IncomingDocument<EquipmentAttributes>, current: Option<&Equipment>) -> Result<WriteSet> {
    let creating = current.is_none();
    let supplier = doc.one("supplier");
    let attrs = doc.attributes;

    let mut violations = Violations::new();
    if creating || attrs.name.is_some() {
        if let Some(name) = violations.check(validate_required("name", attrs.name.as_deref())) {
            violations.check(validate_length("name", name.trim(), 1, 200));
        }
    }
    if let Some(Some(barcode)) = &attrs.barcode {
        violations.check(validate_length("barcode", barcode.trim(), 1, 100));
    }
    if let Some(Some(url)) = &attrs.image_url {
        violations.check(validate_url("imageUrl", url));
    }
    let purchased = match attrs.purchase_date {
        Some(value) => value,
        None => current.and_then(|e| e.purchase_date),
    };
    let warranty = match attrs.warranty_expiration {
        Some(value) => value,
        None => current.and_then(|e| e.warranty_expiration),
    };
    violations.check(validate_date_order("warrantyExpiration", warranty, "purchaseDate", purchased));
    violations.finish()?;

    if let Some(status) = attrs.status {
        check_status(current.map(|e| e.status), status)?;
    }

    if let Some(Some(barcode)) = &attrs.barcode {
        let company = current
            .and_then(|e| e.company.as_ref().map(|c| c.id))
            .unwrap_or(ctx.company_id);
        if barcode_taken(&state.store, company, barcode.trim(), current.map(|e| e.id))? {
            return Err(ApiError::conflict(format!(
                "barcode '{}' is already in use",
                barcode.trim()
            )));
        }
    }

    let mut write = WriteSet::new();
    if let Some(name) = attrs.name {
        write.set("name", name.trim());
    }
    write.patch("barcode", attrs.barcode.map(|b| b.map(|b| b.trim().to_string())));
    write.patch("description", attrs.description);
    write.patch("manufacturer", attrs.manufacturer);
    write.patch("model", attrs.model);
    write.patch("category", attrs.category);
    write.patch("imageUrl", attrs.image_url);
    write.patch("purchaseDate", attrs.purchase_date);
    write.patch("warrantyExpiration", attrs.warranty_expiration);
    match attrs.status {
        Some(status) => {
            write.set("status", status.to_string());
        }
        None if creating => {
            write.set("status", EquipmentStatus::Available.to_string());
        }
        None => {}
    }
    if let Some(supplier) = supplier {
        write.relate_one("supplier", supplier);
    }
    Ok(write)
}

impl CrudResource for Equipment {
    type Create = EquipmentAttributes;
    type Update = EquipmentAttributes;

    fn prepare_create(state: &AppState, ctx: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        write(state, ctx, doc, None)
    }

    fn prepare_update(
        state: &AppState,
        ctx: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        write(state, ctx, doc, Some(current))
    }

    fn before_delete(state: &AppState, _: &RequestContext, current: &Self) -> Result<()> {
        if current.status == EquipmentStatus::OnLoan
            || loans::active_loan_exists(&state.store, "equipment", current.id)?
        {
            return Err(ApiError::conflict(format!("equipment '{}' is on loan", current.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(EquipmentStatus::OnLoan.to_string(), "on_loan");
        assert_eq!("maintenance".parse::<EquipmentStatus>().unwrap(), EquipmentStatus::Maintenance);
        assert_eq!(json!(EquipmentStatus::Retired), json!("retired"));
        assert!("lost".parse::<EquipmentStatus>().is_err());
    }

    #[test]
    fn loan_status_is_not_set_by_hand() {
        assert!(check_status(None, EquipmentStatus::OnLoan).is_err());
        assert!(check_status(Some(EquipmentStatus::OnLoan), EquipmentStatus::Available).is_err());
        assert!(check_status(Some(EquipmentStatus::Available), EquipmentStatus::Maintenance).is_ok());
    }

    #[test]
    fn barcodes_are_unique_within_a_company() {
        let state = crate::testing::state();
        let companies = Repository::<Company>::new(&state.store);
        let (acme, globex) = (Uuid::new_v4(), Uuid::new_v4());
        for (id, name) in [(acme, "Acme"), (globex, "Globex")] {
            let mut write = WriteSet::new();
            write.set("name", name);
            companies.create(id, write).unwrap();
        }

        let ctx = RequestContext::new(Uuid::new_v4(), acme, vec!["CompanyAdministrator".into()]);
        let repo = Repository::<Equipment>::new(&state.store);
        let drill = Uuid::new_v4();
        RequestContext::sync_scope(ctx, || {
            let mut write = WriteSet::new();
            write.set("name", "Drill").set("barcode", "EQ-1").set("status", "available");
            repo.create(drill, write).unwrap();
        });

        assert!(barcode_taken(&state.store, acme, "EQ-1", None).unwrap());
        assert!(!barcode_taken(&state.store, acme, "EQ-1", Some(drill)).unwrap());
        assert!(!barcode_taken(&state.store, globex, "EQ-1", None).unwrap());
    }
}
