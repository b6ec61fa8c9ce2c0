use oxigraph::io::RdfFormat;
use oxigraph::model::Term;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::sanitize::{
    LABEL_PREFIX, RDF_TYPE, label_from_iri, parse_node_iri, prop_from_iri, rel_iri,
};
use super::{Direction, Node, PropertyValue, StoreError};
use crate::metrics::METRICS;

/// One solution of a SELECT query, keyed by variable name without `?`
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: HashMap<String, Term>,
}

impl Row {
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.values.get(var.trim_start_matches('?'))
    }

    pub fn iri(&self, var: &str) -> Option<&str> {
        match self.get(var)? {
            Term::NamedNode(node) => Some(node.as_str()),
            _ => None,
        }
    }

    pub fn value(&self, var: &str) -> Option<PropertyValue> {
        PropertyValue::from_term(self.get(var)?)
    }

    pub fn integer(&self, var: &str) -> Option<i64> {
        match self.value(var)? {
            PropertyValue::Integer(i) => Some(i),
            PropertyValue::Float(f) => Some(f as i64),
            _ => None,
        }
    }
}

/// Shared handle to the embedded store
#[derive(Clone)]
pub struct GraphStore {
    store: Store,
    write_lock: Arc<Mutex<()>>,
}

impl GraphStore {
    /// An empty in-memory store
    pub fn new() -> Result<Self, StoreError> {
        let store = Store::new().map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// An in-memory store seeded from `snapshot` when the file exists
    pub fn open(snapshot: Option<&Path>) -> Result<Self, StoreError> {
        let graph = Self::new()?;
        if let Some(path) = snapshot.filter(|p| p.exists()) {
            graph.load_snapshot(path)?;
        }
        Ok(graph)
    }

    /// Serialise read-check-write sequences (e.g. loan checkout)
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub fn load_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot_err = |reason: String| StoreError::Snapshot {
            path: path.display().to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| snapshot_err(e.to_string()))?;
        self.store
            .load_from_reader(RdfFormat::NQuads, BufReader::new(file))
            .map_err(|e| snapshot_err(e.to_string()))?;
        METRICS.record_graph_query("load");
        info!(path = %path.display(), quads = self.len().unwrap_or_default(), "graph snapshot loaded");
        Ok(())
    }

    /// Write every quad to `path`, replacing it atomically
    pub fn dump_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot_err = |reason: String| StoreError::Snapshot {
            path: path.display().to_string(),
            reason,
        };
        let tmp = path.with_extension("nq.tmp");
        let file = File::create(&tmp).map_err(|e| snapshot_err(e.to_string()))?;
        let mut writer = self
            .store
            .dump_to_writer(RdfFormat::NQuads, BufWriter::new(file))
            .map_err(|e| snapshot_err(e.to_string()))?;
        writer.flush().map_err(|e| snapshot_err(e.to_string()))?;
        drop(writer);
        std::fs::rename(&tmp, path).map_err(|e| snapshot_err(e.to_string()))?;
        METRICS.record_graph_query("dump");
        info!(path = %path.display(), "graph snapshot written");
        Ok(())
    }

    fn evaluate(&self, query: &str) -> Result<QueryResults, StoreError> {
        #[allow(deprecated)]
        let results = self.store.query(query);
        results.map_err(|e| StoreError::Query(e.to_string()))
    }

    pub fn select(&self, query: &str) -> Result<Vec<Row>, StoreError> {
        let started = Instant::now();
        METRICS.record_graph_query("select");
        let results = self.evaluate(query)?;

        let QueryResults::Solutions(solutions) = results else {
            return Err(StoreError::UnexpectedResult("expected solutions".into()));
        };

        let mut rows = Vec::new();
        for solution in solutions {
            let solution = solution.map_err(|e| StoreError::Query(e.to_string()))?;
            let values = solution
                .iter()
                .map(|(var, term)| (var.as_str().to_string(), term.clone()))
                .collect();
            rows.push(Row { values });
        }
        debug!(rows = rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "select");
        Ok(rows)
    }

    pub fn ask(&self, query: &str) -> Result<bool, StoreError> {
        METRICS.record_graph_query("ask");
        match self.evaluate(query)? {
            QueryResults::Boolean(answer) => Ok(answer),
            _ => Err(StoreError::UnexpectedResult("expected boolean".into())),
        }
    }

    /// Run a query built with [`super::QueryBuilder::count`]
    pub fn count(&self, query: &str) -> Result<u64, StoreError> {
        let rows = self.select(query)?;
        let count = rows
            .first()
            .and_then(|row| row.integer("count"))
            .unwrap_or_default();
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn update(&self, update: &str) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        METRICS.record_graph_query("update");
        #[allow(deprecated)]
        let outcome = self.store.update(update);
        outcome.map_err(|e| StoreError::Update(e.to_string()))
    }

    pub fn node(&self, iri: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes(&[iri.to_string()])?.into_iter().next())
    }

    /// Load several nodes at once, in the order given; unknown IRIs are skipped
    pub fn nodes(&self, iris: &[String]) -> Result<Vec<Node>, StoreError> {
        if iris.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<String> = iris
            .iter()
            .filter(|iri| parse_node_iri(iri).is_some())
            .map(|iri| format!("<{iri}>"))
            .collect();
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT ?s ?p ?o WHERE {{ VALUES ?s {{ {} }} ?s ?p ?o . FILTER (isLiteral(?o) || ?p = <{RDF_TYPE}>) }}",
            values.join(" ")
        );

        let mut found: HashMap<String, (bool, Node)> = HashMap::new();
        for row in self.select(&query)? {
            let (Some(subject), Some(predicate), Some(object)) =
                (row.iri("s"), row.iri("p"), row.get("o"))
            else {
                continue;
            };
            let Some((label, id)) = parse_node_iri(subject) else {
                continue;
            };
            let (typed, node) = found.entry(subject.to_string()).or_insert_with(|| {
                (
                    false,
                    Node {
                        iri: subject.to_string(),
                        label: label.to_string(),
                        id,
                        properties: Default::default(),
                    },
                )
            });

            if predicate == RDF_TYPE {
                if let Term::NamedNode(class) = object {
                    *typed |= label_from_iri(class.as_str()) == Some(label);
                }
            } else if let Some(name) = prop_from_iri(predicate) {
                if let Some(value) = PropertyValue::from_term(object) {
                    node.properties.insert(name.to_string(), value);
                }
            }
        }

        Ok(iris
            .iter()
            .filter_map(|iri| match found.remove(iri) {
                Some((true, node)) => Some(node),
                _ => None,
            })
            .collect())
    }

    /// IRIs of the nodes on the other end of `edge`
    pub fn related(
        &self,
        iri: &str,
        edge: &str,
        direction: Direction,
    ) -> Result<Vec<String>, StoreError> {
        let rel = rel_iri(edge);
        let pattern = match direction {
            Direction::Outgoing => format!("<{iri}> <{rel}> ?o"),
            Direction::Incoming => format!("?o <{rel}> <{iri}>"),
        };
        let rows = self.select(&format!("SELECT ?o WHERE {{ {pattern} . }} ORDER BY ?o"))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.iri("o").map(str::to_string))
            .collect())
    }

    /// Number of nodes carrying `label`
    pub fn count_label(&self, label: &str) -> Result<u64, StoreError> {
        self.count(&format!(
            "SELECT (COUNT(?n) AS ?count) WHERE {{ ?n a <{LABEL_PREFIX}{label}> . }}"
        ))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.store.len().map_err(|e| StoreError::Query(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Round-trip a trivial query through the engine
    pub fn health_check(&self) -> Result<(), StoreError> {
        self.ask("ASK { }").map(|_| ())
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::UpdateBuilder;
    use crate::graph::sanitize::{label_iri, node_iri, prop_iri};
    use uuid::Uuid;

    fn seed(store: &GraphStore, label: &str, name: &str) -> String {
        let iri = node_iri(label, Uuid::new_v4());
        let update = UpdateBuilder::new()
            .insert(&iri, RDF_TYPE, format!("<{}>", label_iri(label)))
            .insert(&iri, &prop_iri("name"), PropertyValue::from(name).to_sparql())
            .build();
        store.update(&update).expect("insert");
        iri
    }

    #[test]
    fn nodes_round_trip() {
        let store = GraphStore::new().unwrap();
        let drill = seed(&store, "Equipment", "Drill");
        let saw = seed(&store, "Equipment", "Saw");

        let nodes = store.nodes(&[saw.clone(), drill.clone()]).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].iri, saw);
        assert_eq!(nodes[1].string("name").unwrap(), "Drill");
        assert_eq!(store.count_label("Equipment").unwrap(), 2);
    }

    #[test]
    fn missing_node_is_none() {
        let store = GraphStore::new().unwrap();
        let iri = node_iri("Loan", Uuid::new_v4());
        assert!(store.node(&iri).unwrap().is_none());
    }

    #[test]
    fn related_follows_direction() {
        let store = GraphStore::new().unwrap();
        let loan = seed(&store, "Loan", "l");
        let equipment = seed(&store, "Equipment", "e");
        store
            .update(
                &UpdateBuilder::new()
                    .insert(&loan, &rel_iri("LOAN_OF"), format!("<{equipment}>"))
                    .build(),
            )
            .unwrap();

        assert_eq!(
            store.related(&loan, "LOAN_OF", Direction::Outgoing).unwrap(),
            vec![equipment.clone()]
        );
        assert_eq!(
            store.related(&equipment, "LOAN_OF", Direction::Incoming).unwrap(),
            vec![loan]
        );
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.nq");
        let store = GraphStore::new().unwrap();
        let iri = seed(&store, "Supplier", "Acme");
        store.dump_snapshot(&path).unwrap();

        let restored = GraphStore::open(Some(&path)).unwrap();
        let node = restored.node(&iri).unwrap().expect("restored node");
        assert_eq!(node.string("name").unwrap(), "Acme");
    }

    #[test]
    fn health_check_passes_on_empty_store() {
        let store = GraphStore::new().unwrap();
        assert!(store.health_check().is_ok());
        assert!(store.is_empty().unwrap());
    }
}
