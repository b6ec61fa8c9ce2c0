//! Entity factory: graph rows to typed entities.
//!
//! A [`Record`] holds a primary node plus, for each relationship token of
//! its resource, the related node(s). Mapping functions read attributes off
//! the primary node and resolve related entities by token name.

pub mod factory;
pub mod record;

pub use factory::EntityFactory;
pub use record::{Record, RecordField};

use thiserror::Error;

/// Errors that can occur while mapping graph data to entities
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("{label} node is missing required field '{field}'")]
    MissingField { label: String, field: String },

    #[error("{label}.{field}: expected {expected}, found {found}")]
    TypeMismatch {
        label: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{label}.{field}: invalid value: {reason}")]
    InvalidValue {
        label: String,
        field: String,
        reason: String,
    },

    #[error("{label}.{field}: invalid JSON: {reason}")]
    InvalidJson {
        label: String,
        field: String,
        reason: String,
    },

    #[error("expected a {expected} node, found {found}")]
    UnexpectedLabel { expected: String, found: String },

    #[error("no resource is registered for label '{0}'")]
    UnknownLabel(String),

    #[error("resource '{0}' has no mapping function")]
    NoMapper(&'static str),

    #[error("relationship '{token}' holds {found} where {expected} was declared")]
    Cardinality {
        token: String,
        expected: &'static str,
        found: &'static str,
    },
}
