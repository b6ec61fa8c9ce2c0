use std::collections::HashMap;

use super::{MappingError, Record, RecordField};
use crate::graph::sanitize::parse_node_iri;
use crate::graph::{GraphStore, QueryBuilder, StoreError};
use crate::resource::{Cardinality, Entity, ResourceDescriptor};

/// Loads records from the store and maps them to entities
pub struct EntityFactory<'a> {
    store: &'a GraphStore,
}

impl<'a> EntityFactory<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self { store }
    }

    pub fn hydrate(
        &self,
        descriptor: &ResourceDescriptor,
        iri: &str,
    ) -> Result<Option<Record>, StoreError> {
        Ok(self
            .hydrate_many(descriptor, &[iri.to_string()])?
            .into_iter()
            .next())
    }

    /// Load primary nodes and every declared relationship, one query per
    /// relationship token. Records keep the order of `iris`.
    pub fn hydrate_many(
        &self,
        descriptor: &ResourceDescriptor,
        iris: &[String],
    ) -> Result<Vec<Record>, StoreError> {
        let primaries: Vec<_> = self
            .store
            .nodes(iris)?
            .into_iter()
            .filter(|node| node.label == descriptor.label)
            .collect();
        if primaries.is_empty() {
            return Ok(Vec::new());
        }

        let values = primaries
            .iter()
            .map(|node| format!("<{}>", node.iri))
            .collect::<Vec<_>>()
            .join(" ");

        let mut edges: Vec<(&str, HashMap<String, Vec<String>>)> = Vec::new();
        let mut related_iris: Vec<String> = Vec::new();
        for rel in descriptor.relationships {
            let query = QueryBuilder::select()
                .variable("?s")
                .variable("?o")
                .block(format!("VALUES ?s {{ {values} }}"))
                .edge("?s", rel.edge, rel.direction, "?o")
                .order_by("?o")
                .build();

            let mut by_subject: HashMap<String, Vec<String>> = HashMap::new();
            for row in self.store.select(&query)? {
                let (Some(subject), Some(object)) = (row.iri("s"), row.iri("o")) else {
                    continue;
                };
                if parse_node_iri(object).is_none() {
                    continue;
                }
                by_subject
                    .entry(subject.to_string())
                    .or_default()
                    .push(object.to_string());
                related_iris.push(object.to_string());
            }
            edges.push((rel.name, by_subject));
        }

        related_iris.sort();
        related_iris.dedup();
        let related: HashMap<String, _> = self
            .store
            .nodes(&related_iris)?
            .into_iter()
            .map(|node| (node.iri.clone(), node))
            .collect();

        let mut records = Vec::with_capacity(primaries.len());
        for node in primaries {
            let iri = node.iri.clone();
            let mut record = Record::from_node(node);
            for (rel, (token, by_subject)) in descriptor.relationships.iter().zip(&edges) {
                let nodes: Vec<_> = by_subject
                    .get(&iri)
                    .into_iter()
                    .flatten()
                    .filter_map(|target| related.get(target).cloned())
                    .collect();
                match rel.cardinality {
                    Cardinality::One => {
                        if let Some(first) = nodes.into_iter().next() {
                            record.insert(token, RecordField::Node(first));
                        }
                    }
                    Cardinality::Many => record.insert(token, RecordField::Nodes(nodes)),
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    pub fn map<E: Entity>(record: &Record) -> Result<E, MappingError> {
        E::from_record(record)
    }

    pub fn map_all<E: Entity>(records: &[Record]) -> Result<Vec<E>, MappingError> {
        records.iter().map(E::from_record).collect()
    }
}
