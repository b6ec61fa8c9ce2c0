use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::companies::Company;
use super::loans::{self, Loan};
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::repository::WriteSet;
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{
    Violations, validate_date_order, validate_email, validate_length, validate_required,
    validate_url,
};

static RELATIONSHIPS: [RelationshipDescriptor; 2] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
    RelationshipDescriptor::many("loans", "LOANED_TO", "loans").incoming(),
];

pub static EMPLOYEES: ResourceDescriptor = ResourceDescriptor {
    type_name: "employees",
    endpoint: "employees",
    label: "Employee",
    attributes: &[
        "firstName",
        "lastName",
        "email",
        "phone",
        "avatar",
        "startDate",
        "endDate",
        "createdAt",
        "updatedAt",
    ],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &["firstName", "lastName", "email"],
    sortable: &["firstName", "lastName", "email", "startDate", "endDate", "createdAt", "updatedAt"],
    default_sort: "lastName",
    persisted: true,
    from_record: Some(boxed_from_record::<Employee>),
};

#[derive(Debug, Clone)]
pub struct Employee {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub loans: Vec<Loan>,
}

impl ApiEntity for Employee {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &EMPLOYEES
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("firstName", json!(self.first_name)),
            ("lastName", json!(self.last_name)),
            ("email", json!(self.email)),
            ("phone", json!(self.phone)),
            ("avatar", json!(self.avatar)),
            ("startDate", json!(self.start_date)),
            ("endDate", json!(self.end_date)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("loans", Related::many(&self.loans)),
        ]
    }
}

impl Entity for Employee {
    fn resource() -> &'static ResourceDescriptor {
        &EMPLOYEES
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            first_name: node.string("firstName")?,
            last_name: node.string("lastName")?,
            email: node.opt_string("email")?,
            phone: node.opt_string("phone")?,
            avatar: node.opt_string("avatar")?,
            start_date: node.opt_datetime("startDate")?,
            end_date: node.opt_datetime("endDate")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            company: record.single("company")?,
            loans: record.many("loans")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeAttributes {
    first_name: Option<String>,
    last_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    end_date: Option<Option<DateTime<Utc>>>,
}

/// Check `attrs` as applied on top of `current`, if any
fn write(attrs: EmployeeAttributes, current: Option<&Employee>) -> Result<WriteSet> {
    let creating = current.is_none();
    let mut violations = Violations::new();
    for (field, value) in [("firstName", &attrs.first_name), ("lastName", &attrs.last_name)] {
        if creating || value.is_some() {
            if let Some(value) = violations.check(validate_required(field, value.as_deref())) {
                violations.check(validate_length(field, value.trim(), 1, 100));
            }
        }
    }
    if let Some(Some(email)) = &attrs.email {
        violations.check(validate_email("email", email.trim()));
    }
    if let Some(Some(avatar)) = &attrs.avatar {
        violations.check(validate_url("avatar", avatar));
    }

    let start = match attrs.start_date {
        Some(value) => value,
        None => current.and_then(|e| e.start_date),
    };
    let end = match attrs.end_date {
        Some(value) => value,
        None => current.and_then(|e| e.end_date),
    };
    violations.check(validate_date_order("endDate", end, "startDate", start));
    violations.finish()?;

    let mut write = WriteSet::new();
    if let Some(first) = attrs.first_name {
        write.set("firstName", first.trim());
    }
    if let Some(last) = attrs.last_name {
        write.set("lastName", last.trim());
    }
    write.patch("email", attrs.email.map(|e| e.map(|e| e.trim().to_lowercase())));
    write.patch("phone", attrs.phone);
    write.patch("avatar", attrs.avatar);
    write.patch("startDate", attrs.start_date);
    write.patch("endDate", attrs.end_date);
    Ok(write)
}

impl CrudResource for Employee {
    type Create = EmployeeAttributes;
    type Update = EmployeeAttributes;

    fn prepare_create(_: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        write(doc.attributes, None)
    }

    fn prepare_update(
        _: &AppState,
        _: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        write(doc.attributes, Some(current))
    }

    fn before_delete(state: &AppState, _: &RequestContext, current: &Self) -> Result<()> {
        if loans::active_loan_exists(&state.store, "employee", current.id)? {
            return Err(ApiError::conflict(format!(
                "employee '{}' still holds equipment on loan",
                current.id
            )));
        }
        Ok(())
    }
}
