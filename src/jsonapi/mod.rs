//! JSON:API documents: serialisation, request parsing, query parameters

pub mod document;
pub mod incoming;
pub mod query;
pub mod response;
pub mod serializer;

pub use document::{Document, PrimaryData, ResourceIdentifier, ResourceObject};
pub use incoming::{IncomingDocument, nullable};
pub use query::{ListQuery, PageDefaults, PageRequest, SortField};
pub use response::JsonApiResponse;
pub use serializer::{JsonApiSerializer, Paging, ResourceSerializer, SerializerFactory};

use thiserror::Error;

pub const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("no serialiser is registered for type '{0}'")]
    UnknownType(String),

    #[error("{type_name} entity does not produce declared attribute '{attribute}'")]
    MissingAttribute {
        type_name: &'static str,
        attribute: &'static str,
    },

    #[error("{type_name} has no relationship '{relationship}'")]
    UndeclaredRelationship {
        type_name: &'static str,
        relationship: &'static str,
    },

    #[error("serialiser for '{expected}' was given a '{found}' entity")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
