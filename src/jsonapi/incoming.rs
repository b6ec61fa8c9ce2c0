//! Request documents for create and update

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ApiError, ErrorCode, Result};
use crate::resource::{Cardinality, ResourceDescriptor, Target};
use crate::validation::ValidationError;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "A: Deserialize<'de> + Default"))]
struct RawDocument<A> {
    data: RawResource<A>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "A: Deserialize<'de> + Default"))]
struct RawResource<A> {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attributes: A,
    #[serde(default)]
    relationships: HashMap<String, RawRelationship>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    data: RawLinkage,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLinkage {
    One(Option<RawIdentifier>),
    Many(Vec<RawIdentifier>),
}

#[derive(Debug, Deserialize)]
struct RawIdentifier {
    #[serde(rename = "type")]
    type_name: String,
    id: String,
}

/// Distinguish an absent attribute (`None`) from an explicit `null`
/// (`Some(None)`); use with `#[serde(default, deserialize_with = "nullable")]`
pub fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A checked request document
#[derive(Debug)]
pub struct IncomingDocument<A> {
    /// Client-supplied id on create, path id on update
    pub id: Option<Uuid>,
    pub attributes: A,
    /// Related ids per relationship token; an empty list clears it
    pub relationships: IndexMap<&'static str, Vec<Uuid>>,
}

impl<A: DeserializeOwned + Default> IncomingDocument<A> {
    /// Parse `body` as a document for `descriptor`.
    ///
    /// The primary `type` must equal the resource type, and on update
    /// (`path_id` set) the document `id` must equal the path id; both
    /// mismatches are conflicts.
    pub fn parse(body: &[u8], descriptor: &ResourceDescriptor, path_id: Option<Uuid>) -> Result<Self> {
        let raw: RawDocument<A> = serde_json::from_slice(body)
            .map_err(|err| ApiError::malformed(format!("invalid request document: {err}")))?;
        let data = raw.data;

        if data.type_name != descriptor.type_name {
            return Err(ApiError::builder(ErrorCode::Conflict)
                .detail(format!(
                    "document type '{}' does not match endpoint type '{}'",
                    data.type_name, descriptor.type_name
                ))
                .pointer("/data/type")
                .build());
        }

        let id = match (&data.id, path_id) {
            (None, None) => None,
            (Some(raw_id), None) => Some(Uuid::parse_str(raw_id).map_err(|_| {
                ApiError::builder(ErrorCode::MalformedDocument)
                    .detail(format!("'{raw_id}' is not a valid id"))
                    .pointer("/data/id")
                    .build()
            })?),
            (Some(raw_id), Some(expected)) if Uuid::parse_str(raw_id).ok() == Some(expected) => {
                Some(expected)
            }
            (_, Some(expected)) => {
                return Err(ApiError::builder(ErrorCode::Conflict)
                    .detail(format!("document id must be '{expected}'"))
                    .pointer("/data/id")
                    .build());
            }
        };

        let mut relationships = IndexMap::new();
        for (name, relationship) in data.relationships {
            let Some(declared) = descriptor.relationship(&name).filter(|rel| rel.writable) else {
                return Err(ApiError::builder(ErrorCode::MalformedDocument)
                    .detail(format!(
                        "{} has no writable relationship '{name}'",
                        descriptor.type_name
                    ))
                    .pointer(format!("/data/relationships/{name}"))
                    .build());
            };

            let identifiers = match (relationship.data, declared.cardinality) {
                (RawLinkage::One(one), Cardinality::One) => one.into_iter().collect(),
                (RawLinkage::Many(many), Cardinality::Many) => many,
                _ => {
                    return Err(ValidationError::Relationship {
                        field: name,
                        reason: "wrong cardinality".to_string(),
                    }
                    .into());
                }
            };

            let mut ids = Vec::with_capacity(identifiers.len());
            for identifier in identifiers {
                if let Target::Resource(target) = declared.target {
                    if identifier.type_name != target {
                        return Err(ApiError::builder(ErrorCode::Conflict)
                            .detail(format!(
                                "relationship '{name}' expects type '{target}', got '{}'",
                                identifier.type_name
                            ))
                            .pointer(format!("/data/relationships/{name}/data"))
                            .build());
                    }
                }
                let id = Uuid::parse_str(&identifier.id).map_err(|_| {
                    ApiError::from(ValidationError::Relationship {
                        field: name.clone(),
                        reason: format!("'{}' is not a valid id", identifier.id),
                    })
                })?;
                ids.push(id);
            }
            relationships.insert(declared.name, ids);
        }

        Ok(Self {
            id,
            attributes: data.attributes,
            relationships,
        })
    }

    /// The single id given for a to-one relationship, if it was sent
    pub fn one(&self, name: &str) -> Option<Option<Uuid>> {
        self.relationships
            .get(name)
            .map(|ids| ids.first().copied())
    }
}
