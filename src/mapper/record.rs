use std::collections::HashMap;

use super::MappingError;
use crate::graph::Node;
use crate::registry::MODELS;
use crate::resource::{ApiEntity, Entity};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordField {
    Node(Node),
    Nodes(Vec<Node>),
}

/// A primary node and its related nodes keyed by relationship token
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    primary: Node,
    fields: HashMap<String, RecordField>,
}

impl Record {
    /// A record with no related nodes, as used for included entities
    pub fn from_node(node: Node) -> Self {
        Self {
            primary: node,
            fields: HashMap::new(),
        }
    }

    pub fn insert(&mut self, token: &str, field: RecordField) {
        self.fields.insert(token.to_string(), field);
    }

    pub fn with(mut self, token: &str, field: RecordField) -> Self {
        self.insert(token, field);
        self
    }

    pub fn node(&self) -> &Node {
        &self.primary
    }

    pub fn field(&self, token: &str) -> Option<&RecordField> {
        self.fields.get(token)
    }

    fn expect_label<E: Entity>(node: &Node) -> Result<(), MappingError> {
        let expected = E::resource().label;
        if node.label == expected {
            Ok(())
        } else {
            Err(MappingError::UnexpectedLabel {
                expected: expected.to_string(),
                found: node.label.clone(),
            })
        }
    }

    fn map_node<E: Entity>(node: &Node) -> Result<E, MappingError> {
        Self::expect_label::<E>(node)?;
        E::from_record(&Record::from_node(node.clone()))
    }

    /// Resolve a single-child token; an absent token maps to `None`
    pub fn single<E: Entity>(&self, token: &str) -> Result<Option<E>, MappingError> {
        match self.fields.get(token) {
            None => Ok(None),
            Some(RecordField::Node(node)) => Self::map_node(node).map(Some),
            Some(RecordField::Nodes(_)) => Err(MappingError::Cardinality {
                token: token.to_string(),
                expected: "one node",
                found: "a list",
            }),
        }
    }

    /// Resolve a children token; an absent token maps to an empty list
    pub fn many<E: Entity>(&self, token: &str) -> Result<Vec<E>, MappingError> {
        match self.fields.get(token) {
            None => Ok(Vec::new()),
            Some(RecordField::Nodes(nodes)) => nodes.iter().map(Self::map_node).collect(),
            Some(RecordField::Node(_)) => Err(MappingError::Cardinality {
                token: token.to_string(),
                expected: "a list",
                found: "one node",
            }),
        }
    }

    /// Resolve a polymorphic token through the registry entry of the node's label
    pub fn dynamic(&self, token: &str) -> Result<Option<Box<dyn ApiEntity>>, MappingError> {
        let node = match self.fields.get(token) {
            None => return Ok(None),
            Some(RecordField::Node(node)) => node,
            Some(RecordField::Nodes(_)) => {
                return Err(MappingError::Cardinality {
                    token: token.to_string(),
                    expected: "one node",
                    found: "a list",
                });
            }
        };
        let descriptor = MODELS
            .by_label(&node.label)
            .map_err(|_| MappingError::UnknownLabel(node.label.clone()))?;
        let map = descriptor
            .from_record
            .ok_or(MappingError::NoMapper(descriptor.type_name))?;
        map(&Record::from_node(node.clone())).map(Some)
    }
}
