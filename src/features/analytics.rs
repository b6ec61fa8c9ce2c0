//! Dashboard counts for the caller's company

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Value, json};
use uuid::Uuid;

use super::equipments::{EQUIPMENTS, EquipmentStatus};
use super::{employees::EMPLOYEES, loans::LOANS, suppliers::SUPPLIERS};
use crate::context::RequestContext;
use crate::error::Result;
use crate::graph::sanitize::{label_iri, node_iri, prop_iri};
use crate::graph::{Direction, GraphStore, PropertyValue, QueryBuilder};
use crate::permissions::{Action, PermissionService};
use crate::repository::{COMPANY_EDGE, NODE_VAR};
use crate::resource::{ApiEntity, ResourceDescriptor, Scope};
use crate::state::AppState;

pub static ANALYTICS: ResourceDescriptor = ResourceDescriptor {
    type_name: "analytics",
    endpoint: "analytics",
    label: "Analytics",
    attributes: &[
        "employees",
        "equipments",
        "equipmentsAvailable",
        "equipmentsOnLoan",
        "equipmentsInMaintenance",
        "equipmentsRetired",
        "activeLoans",
        "overdueLoans",
        "suppliers",
    ],
    relationships: &[],
    scope: Scope::Company,
    search_fields: &[],
    sortable: &[],
    default_sort: "",
    persisted: false,
    from_record: None,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analytics {
    /// Company the counts belong to
    pub id: Uuid,
    pub employees: u64,
    pub equipments: u64,
    pub equipments_available: u64,
    pub equipments_on_loan: u64,
    pub equipments_in_maintenance: u64,
    pub equipments_retired: u64,
    pub active_loans: u64,
    pub overdue_loans: u64,
    pub suppliers: u64,
}

impl ApiEntity for Analytics {
    fn descriptor(&self) -> &'static ResourceDescriptor {
        &ANALYTICS
    }

    fn id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> IndexMap<&'static str, Value> {
        IndexMap::from([
            ("employees", json!(self.employees)),
            ("equipments", json!(self.equipments)),
            ("equipmentsAvailable", json!(self.equipments_available)),
            ("equipmentsOnLoan", json!(self.equipments_on_loan)),
            ("equipmentsInMaintenance", json!(self.equipments_in_maintenance)),
            ("equipmentsRetired", json!(self.equipments_retired)),
            ("activeLoans", json!(self.active_loans)),
            ("overdueLoans", json!(self.overdue_loans)),
            ("suppliers", json!(self.suppliers)),
        ])
    }
}

struct Counter<'a> {
    store: &'a GraphStore,
    company: String,
}

impl Counter<'_> {
    fn count(&self, descriptor: &ResourceDescriptor, constraints: &[String]) -> Result<u64> {
        let mut query = QueryBuilder::count(NODE_VAR)
            .pattern(format!("{NODE_VAR} a <{}>", label_iri(descriptor.label)))
            .edge(NODE_VAR, COMPANY_EDGE, Direction::Outgoing, &self.company);
        for constraint in constraints {
            query = query.filter(constraint.clone());
        }
        Ok(self.store.count(&query.build())?)
    }

    fn with_status(&self, status: EquipmentStatus) -> Result<u64> {
        let constraint = format!(
            "EXISTS {{ {NODE_VAR} <{}> {} }}",
            prop_iri("status"),
            PropertyValue::from(status.to_string()).to_sparql()
        );
        self.count(&EQUIPMENTS, &[constraint])
    }
}

/// Counts for `ctx`'s company
pub fn compute(state: &AppState, ctx: &RequestContext) -> Result<Analytics> {
    PermissionService::new(&state.store).authorize(ctx, ANALYTICS.endpoint, Action::Read)?;

    let counter = Counter {
        store: &state.store,
        company: format!("<{}>", node_iri("Company", ctx.company_id)),
    };
    let not_returned = format!("NOT EXISTS {{ {NODE_VAR} <{}> ?returned }}", prop_iri("returnedAt"));
    let overdue = format!(
        "EXISTS {{ {NODE_VAR} <{}> ?end . FILTER (?end < {}) }}",
        prop_iri("endDate"),
        PropertyValue::from(Utc::now()).to_sparql()
    );

    Ok(Analytics {
        id: ctx.company_id,
        employees: counter.count(&EMPLOYEES, &[])?,
        equipments: counter.count(&EQUIPMENTS, &[])?,
        equipments_available: counter.with_status(EquipmentStatus::Available)?,
        equipments_on_loan: counter.with_status(EquipmentStatus::OnLoan)?,
        equipments_in_maintenance: counter.with_status(EquipmentStatus::Maintenance)?,
        equipments_retired: counter.with_status(EquipmentStatus::Retired)?,
        active_loans: counter.count(&LOANS, &[not_returned.clone()])?,
        overdue_loans: counter.count(&LOANS, &[not_returned, overdue])?,
        suppliers: counter.count(&SUPPLIERS, &[])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::companies::Company;
    use crate::features::equipments::Equipment;
    use crate::features::suppliers::Supplier;
    use crate::repository::{Repository, WriteSet};

    #[test]
    fn counts_only_the_callers_company() {
        let state = crate::testing::state();
        let companies = Repository::<Company>::new(&state.store);
        let (acme, globex) = (Uuid::new_v4(), Uuid::new_v4());
        for (id, name) in [(acme, "Acme"), (globex, "Globex")] {
            let mut write = WriteSet::new();
            write.set("name", name);
            companies.create(id, write).unwrap();
        }

        let in_company = |company: Uuid| RequestContext::new(Uuid::new_v4(), company, vec!["CompanyAdministrator".into()]);
        RequestContext::sync_scope(in_company(acme), || {
            let equipments = Repository::<Equipment>::new(&state.store);
            for (name, status) in [("Drill", "available"), ("Saw", "maintenance"), ("Lathe", "available")] {
                let mut write = WriteSet::new();
                write.set("name", name).set("status", status);
                equipments.create(Uuid::new_v4(), write).unwrap();
            }
        });
        RequestContext::sync_scope(in_company(globex), || {
            let mut write = WriteSet::new();
            write.set("name", "Bosch");
            Repository::<Supplier>::new(&state.store).create(Uuid::new_v4(), write).unwrap();
        });

        let acme_counts = compute(&state, &in_company(acme)).unwrap();
        assert_eq!(acme_counts.equipments, 3);
        assert_eq!(acme_counts.equipments_available, 2);
        assert_eq!(acme_counts.equipments_in_maintenance, 1);
        assert_eq!(acme_counts.suppliers, 0);
        assert_eq!(acme_counts.active_loans, 0);

        let globex_counts = compute(&state, &in_company(globex)).unwrap();
        assert_eq!(globex_counts.suppliers, 1);
        assert_eq!(globex_counts.equipments, 0);
    }
}
