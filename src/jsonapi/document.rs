//! Outgoing JSON:API document types

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

pub const JSON_API_VERSION: &str = "1.1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(Option<ResourceIdentifier>),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipObject {
    pub data: RelationshipData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceLinks {
    #[serde(rename = "self")]
    pub self_link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    pub attributes: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub relationships: IndexMap<String, RelationshipObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<ResourceLinks>,
}

impl ResourceObject {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            type_name: self.type_name.clone(),
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(Option<ResourceObject>),
    Many(Vec<ResourceObject>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonApiObject {
    pub version: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub jsonapi: JsonApiObject,
    pub data: PrimaryData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub links: IndexMap<&'static str, Option<String>>,
}

impl Document {
    pub fn new(data: PrimaryData) -> Self {
        Self {
            jsonapi: JsonApiObject {
                version: JSON_API_VERSION,
            },
            data,
            included: Vec::new(),
            meta: None,
            links: IndexMap::new(),
        }
    }
}
