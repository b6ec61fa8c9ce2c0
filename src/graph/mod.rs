//! Embedded graph store.
//!
//! Entities live in an oxigraph quad store as labelled nodes with literal
//! properties and named edges between them. Queries are SPARQL text built by
//! [`QueryBuilder`] and [`UpdateBuilder`].

pub mod node;
pub mod query;
pub mod sanitize;
pub mod store;
pub mod value;

pub use node::Node;
pub use query::{QueryBuilder, UpdateBuilder};
pub use store::{GraphStore, Row};
pub use value::PropertyValue;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which end of an edge the owning node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `(owner)-[EDGE]->(related)`
    Outgoing,
    /// `(related)-[EDGE]->(owner)`
    Incoming,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open graph store: {0}")]
    Open(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("update failed: {0}")]
    Update(String),

    #[error("unexpected query result: {0}")]
    UnexpectedResult(String),

    #[error("invalid {kind} identifier '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },

    #[error("snapshot {path}: {reason}")]
    Snapshot { path: String, reason: String },
}
