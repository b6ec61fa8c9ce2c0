//! Equipment loans.
//!
//! A loan ties one piece of equipment to one employee. Creating a loan takes
//! the equipment out of circulation (`on_loan`); returning it puts the
//! equipment back (`available`). Company administrators are notified of both.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::audits::{self, AuditType};
use super::companies::Company;
use super::employees::Employee;
use super::equipments::{Equipment, EquipmentStatus};
use super::notifications::{self, NotificationType};
use crate::context::RequestContext;
use crate::error::{ApiError, Result};
use crate::graph::sanitize::{label_iri, node_iri, prop_iri};
use crate::graph::{GraphStore, PropertyValue, QueryBuilder};
use crate::jsonapi::{IncomingDocument, nullable};
use crate::mapper::{MappingError, Record};
use crate::permissions::Action;
use crate::registry::MODELS;
use crate::repository::{NODE_VAR, Repository, WriteSet};
use crate::resource::{
    ApiEntity, Entity, Related, RelationshipDescriptor, ResourceDescriptor, Scope, Target,
    boxed_from_record,
};
use crate::service::CrudResource;
use crate::state::AppState;
use crate::validation::{ValidationError, Violations, validate_date_order};

static RELATIONSHIPS: [RelationshipDescriptor; 3] = [
    RelationshipDescriptor::one("company", "BELONGS_TO", "companies").read_only(),
    RelationshipDescriptor::one("employee", "LOANED_TO", "employees"),
    RelationshipDescriptor::one("equipment", "LOAN_OF", "equipments"),
];

pub static LOANS: ResourceDescriptor = ResourceDescriptor {
    type_name: "loans",
    endpoint: "loans",
    label: "Loan",
    attributes: &["startDate", "endDate", "returnedAt", "createdAt", "updatedAt"],
    relationships: &RELATIONSHIPS,
    scope: Scope::Company,
    search_fields: &[],
    sortable: &["startDate", "endDate", "returnedAt", "createdAt", "updatedAt"],
    default_sort: "startDate",
    persisted: true,
    from_record: Some(boxed_from_record::<Loan>),
};

#[derive(Debug, Clone)]
pub struct Loan {
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub company: Option<Company>,
    pub employee: Option<Employee>,
    pub equipment: Option<Equipment>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }

    /// Not returned and past its end date
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.end_date.is_some_and(|end| end < now)
    }

    fn summary(&self) -> String {
        let equipment = self
            .equipment
            .as_ref()
            .map_or("equipment", |e| e.name.as_str());
        match &self.employee {
            Some(employee) => format!("{equipment} loaned to {} {}", employee.first_name, employee.last_name),
            None => format!("{equipment} loaned"),
        }
    }
}

impl ApiEntity for Loan {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &LOANS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("startDate", json!(self.start_date)),
            ("endDate", json!(self.end_date)),
            ("returnedAt", json!(self.returned_at)),
            ("createdAt", json!(self.created_at)),
            ("updatedAt", json!(self.updated_at)),
        ])
    }

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        vec![
            ("company", Related::one(&self.company)),
            ("employee", Related::one(&self.employee)),
            ("equipment", Related::one(&self.equipment)),
        ]
    }
}

impl Entity for Loan {
    fn resource() -> &'static ResourceDescriptor {
        &LOANS
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let node = record.node();
        Ok(Self {
            id: node.id,
            start_date: node.datetime("startDate")?,
            end_date: node.opt_datetime("endDate")?,
            returned_at: node.opt_datetime("returnedAt")?,
            created_at: node.datetime("createdAt")?,
            updated_at: node.datetime("updatedAt")?,
            company: record.single("company")?,
            employee: record.single("employee")?,
            equipment: record.single("equipment")?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanAttributes {
    start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "nullable")]
    end_date: Option<Option<DateTime<Utc>>>,
}

fn not_returned() -> String {
    format!("NOT EXISTS {{ {NODE_VAR} <{}> ?returned }}", prop_iri("returnedAt"))
}

fn past_end(now: DateTime<Utc>) -> String {
    format!(
        "EXISTS {{ {NODE_VAR} <{}> ?end . FILTER (?end < {}) }}",
        prop_iri("endDate"),
        PropertyValue::from(now).to_sparql()
    )
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ApiError::invalid_parameter(
            format!("filter[{name}]"),
            format!("'{value}' is not a boolean"),
        )),
    }
}

/// Whether an unreturned loan points at the `relation` node with `id`
pub fn active_loan_exists(store: &GraphStore, relation: &str, id: Uuid) -> Result<bool> {
    let rel = LOANS
        .relationship(relation)
        .ok_or_else(|| ApiError::internal(format!("loans have no relationship '{relation}'")))?;
    let Target::Resource(target) = rel.target else {
        return Err(ApiError::internal(format!("loan relationship '{relation}' is polymorphic")));
    };
    let target = MODELS.by_type(target)?;
    let query = QueryBuilder::ask()
        .pattern(format!("{NODE_VAR} a <{}>", label_iri(LOANS.label)))
        .edge(NODE_VAR, rel.edge, rel.direction, &format!("<{}>", node_iri(target.label, id)))
        .filter(not_returned())
        .build();
    Ok(store.ask(&query)?)
}

/// The equipment a new loan may take: visible and available
fn loanable_equipment(store: &GraphStore, id: Uuid) -> Result<Equipment> {
    let Some(equipment) = Repository::<Equipment>::new(store).find_by_id(id)? else {
        return Err(ValidationError::Relationship {
            field: "equipment".into(),
            reason: format!("equipments '{id}' does not exist"),
        }
        .into());
    };
    if equipment.status != EquipmentStatus::Available {
        return Err(ApiError::conflict(format!(
            "equipment '{}' is {}",
            equipment.name, equipment.status
        )));
    }
    Ok(equipment)
}

fn set_equipment_status(store: &GraphStore, id: Uuid, status: EquipmentStatus) -> Result<()> {
    let mut write = WriteSet::new();
    write.set("status", status.to_string());
    Repository::<Equipment>::new(store).update(id, write)?;
    Ok(())
}

impl CrudResource for Loan {
    type Create = LoanAttributes;
    type Update = LoanAttributes;

    const EXTRA_FILTERS: &'static [&'static str] = &["active", "overdue"];

    fn custom_filter(name: &str, value: &str) -> Result<Option<String>> {
        let wanted = parse_flag(name, value)?;
        let expression = match name {
            "active" => not_returned(),
            "overdue" => format!("({}) && ({})", not_returned(), past_end(Utc::now())),
            _ => {
                return Err(ApiError::invalid_parameter(
                    format!("filter[{name}]"),
                    format!("unsupported filter '{name}'"),
                ));
            }
        };
        Ok(Some(if wanted {
            expression
        } else {
            format!("!({expression})")
        }))
    }

    fn prepare_create(state: &AppState, _: &RequestContext, doc: IncomingDocument<Self::Create>) -> Result<WriteSet> {
        let employee = doc.one("employee").flatten();
        let equipment = doc.one("equipment").flatten();
        let start = doc.attributes.start_date.unwrap_or_else(Utc::now);
        let end = doc.attributes.end_date.flatten();

        let mut violations = Violations::new();
        if employee.is_none() {
            violations.push(ValidationError::Relationship {
                field: "employee".into(),
                reason: "an employee is required".into(),
            });
        }
        if equipment.is_none() {
            violations.push(ValidationError::Relationship {
                field: "equipment".into(),
                reason: "equipment is required".into(),
            });
        }
        violations.check(validate_date_order("endDate", end, "startDate", Some(start)));
        violations.finish()?;

        if let Some(equipment) = equipment {
            loanable_equipment(&state.store, equipment)?;
        }

        let mut write = WriteSet::new();
        write.set("startDate", start);
        if let Some(end) = end {
            write.set("endDate", end);
        }
        write
            .relate_one("employee", employee)
            .relate_one("equipment", equipment);
        Ok(write)
    }

    fn prepare_update(
        _: &AppState,
        _: &RequestContext,
        current: &Self,
        doc: IncomingDocument<Self::Update>,
    ) -> Result<WriteSet> {
        if !doc.relationships.is_empty() {
            return Err(ApiError::conflict("a loan's employee and equipment cannot change"));
        }
        let attrs = doc.attributes;
        let start = attrs.start_date.unwrap_or(current.start_date);
        let end = match attrs.end_date {
            Some(value) => value,
            None => current.end_date,
        };
        validate_date_order("endDate", end, "startDate", Some(start))?;

        let mut write = WriteSet::new();
        if let Some(start) = attrs.start_date {
            write.set("startDate", start);
        }
        write.patch("endDate", attrs.end_date);
        Ok(write)
    }

    fn after_create(state: &AppState, ctx: &RequestContext, created: &Self) -> Result<()> {
        if let Some(equipment) = &created.equipment {
            set_equipment_status(&state.store, equipment.id, EquipmentStatus::OnLoan)?;
        }
        notifications::notify_company_admins(&state.store, ctx, NotificationType::LoanCreated, &created.summary())?;
        Ok(())
    }

    fn before_delete(state: &AppState, _: &RequestContext, current: &Self) -> Result<()> {
        if current.is_active() {
            if let Some(equipment) = &current.equipment {
                set_equipment_status(&state.store, equipment.id, EquipmentStatus::Available)?;
            }
        }
        Ok(())
    }
}

/// Close an active loan and release its equipment
pub fn return_loan(state: &AppState, ctx: &RequestContext, id: Uuid) -> Result<Loan> {
    Loan::authorize(state, ctx, Action::Update)?;
    let repo = Repository::<Loan>::new(&state.store);

    let _guard = state.store.lock_writes();
    let current = repo.get(id)?;
    if !current.is_active() {
        return Err(ApiError::conflict(format!("loan '{id}' was already returned")));
    }

    let mut write = WriteSet::new();
    write.set("returnedAt", Utc::now());
    let returned = repo.update(id, write)?;
    if let Some(equipment) = &returned.equipment {
        set_equipment_status(&state.store, equipment.id, EquipmentStatus::Available)?;
    }
    audits::record(&state.store, ctx, AuditType::Return, &returned, true)?;
    let message = format!("{} returned", returned.summary());
    notifications::notify_company_admins(&state.store, ctx, NotificationType::LoanReturned, &message)?;
    tracing::info!(%id, user = %ctx.user_id, "loan returned");
    Ok(returned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonapi::{ListQuery, PageDefaults};
    use crate::service::CrudService;
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        state: AppState,
        ctx: RequestContext,
        employee: Uuid,
        equipment: Uuid,
    }

    fn fixture() -> Fixture {
        let state = crate::testing::state();
        let company = Uuid::new_v4();
        let mut write = WriteSet::new();
        write.set("name", "Acme");
        Repository::<Company>::new(&state.store).create(company, write).unwrap();

        let ctx = RequestContext::new(Uuid::new_v4(), company, vec!["Administrator".into()]);
        let (employee, equipment) = (Uuid::new_v4(), Uuid::new_v4());
        RequestContext::sync_scope(ctx.clone(), || {
            let mut write = WriteSet::new();
            write.set("firstName", "Ada").set("lastName", "Lovelace");
            Repository::<Employee>::new(&state.store).create(employee, write).unwrap();
            let mut write = WriteSet::new();
            write.set("name", "Drill").set("status", "available");
            Repository::<Equipment>::new(&state.store).create(equipment, write).unwrap();
        });
        Fixture {
            state,
            ctx,
            employee,
            equipment,
        }
    }

    fn loan_body(employee: Uuid, equipment: Uuid) -> Vec<u8> {
        json!({ "data": {
            "type": "loans",
            "attributes": { "endDate": "2020-01-01T00:00:00Z", "startDate": "2019-12-01T00:00:00Z" },
            "relationships": {
                "employee": { "data": { "type": "employees", "id": employee.to_string() } },
                "equipment": { "data": { "type": "equipments", "id": equipment.to_string() } }
            }
        }})
        .to_string()
        .into_bytes()
    }

    fn equipment_status(f: &Fixture) -> EquipmentStatus {
        Repository::<Equipment>::new(&f.state.store)
            .load(f.equipment)
            .unwrap()
            .unwrap()
            .status
    }

    #[test]
    fn loan_lifecycle_moves_equipment_status() {
        let f = fixture();
        let service = CrudService::<Loan>::new(&f.state);
        RequestContext::sync_scope(f.ctx.clone(), || {
            let loan = service.create(&f.ctx, &loan_body(f.employee, f.equipment)).unwrap();
            assert_eq!(equipment_status(&f), EquipmentStatus::OnLoan);
            assert_eq!(loan.equipment.as_ref().map(|e| e.status), Some(EquipmentStatus::OnLoan));
            assert!(active_loan_exists(&f.state.store, "employee", f.employee).unwrap());

            let err = service.create(&f.ctx, &loan_body(f.employee, f.equipment)).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::Conflict);

            let returned = return_loan(&f.state, &f.ctx, loan.id).unwrap();
            assert!(returned.returned_at.is_some());
            assert_eq!(equipment_status(&f), EquipmentStatus::Available);
            assert!(!active_loan_exists(&f.state.store, "equipment", f.equipment).unwrap());

            let err = return_loan(&f.state, &f.ctx, loan.id).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::Conflict);
        });
    }

    #[test]
    fn employees_holding_equipment_cannot_be_deleted() {
        let f = fixture();
        RequestContext::sync_scope(f.ctx.clone(), || {
            let loan = CrudService::<Loan>::new(&f.state)
                .create(&f.ctx, &loan_body(f.employee, f.equipment))
                .unwrap();
            let employees = CrudService::<Employee>::new(&f.state);

            let err = employees.delete(&f.ctx, f.employee).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::Conflict);
            assert!(Repository::<Employee>::new(&f.state.store).load(f.employee).unwrap().is_some());

            return_loan(&f.state, &f.ctx, loan.id).unwrap();
            employees.delete(&f.ctx, f.employee).unwrap();
            assert!(Repository::<Employee>::new(&f.state.store).load(f.employee).unwrap().is_none());
        });
    }

    #[test]
    fn employee_and_equipment_are_required() {
        let f = fixture();
        let body = json!({ "data": { "type": "loans", "attributes": {} } }).to_string();
        let err = RequestContext::sync_scope(f.ctx.clone(), || {
            CrudService::<Loan>::new(&f.state).create(&f.ctx, body.as_bytes())
        })
        .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationFailed);
        assert_eq!(err.violations.len(), 1);
    }

    #[test]
    fn active_and_overdue_filters() {
        let f = fixture();
        let service = CrudService::<Loan>::new(&f.state);
        RequestContext::sync_scope(f.ctx.clone(), || {
            service.create(&f.ctx, &loan_body(f.employee, f.equipment)).unwrap();

            let params = |key: &str, value: &str| vec![(format!("filter[{key}]"), value.to_string())];
            let (page, _) = service.list(&f.ctx, &params("overdue", "true")).unwrap();
            assert_eq!(page.total, 1);
            assert!(page.items[0].is_overdue(Utc::now()));
            let (page, _) = service.list(&f.ctx, &params("active", "false")).unwrap();
            assert_eq!(page.total, 0);
            let err = service.list(&f.ctx, &params("active", "maybe")).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::InvalidParameter);
        });
    }

    #[test]
    fn update_keeps_dates_ordered() {
        let f = fixture();
        RequestContext::sync_scope(f.ctx.clone(), || {
            let service = CrudService::<Loan>::new(&f.state);
            let loan = service.create(&f.ctx, &loan_body(f.employee, f.equipment)).unwrap();
            let body = json!({ "data": {
                "type": "loans",
                "id": loan.id.to_string(),
                "attributes": { "endDate": (loan.start_date - Duration::days(1)).to_rfc3339() }
            }})
            .to_string();
            let err = service.update(&f.ctx, loan.id, body.as_bytes()).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::ValidationFailed);
        });
    }

    #[test]
    fn filter_values_are_flags() {
        assert!(Loan::custom_filter("active", "true").unwrap().is_some());
        assert!(Loan::custom_filter("active", "false").unwrap().unwrap().starts_with('!'));
        let query = ListQuery::parse(
            &[("filter[overdue]".into(), "1".into())],
            &LOANS,
            PageDefaults::default(),
            Loan::EXTRA_FILTERS,
        )
        .unwrap();
        assert_eq!(query.filter("overdue"), Some("1"));
    }
}
