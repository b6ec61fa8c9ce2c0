use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::PropertyValue;
use crate::mapper::MappingError;

/// A node read back from the store: its identity plus literal properties
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub iri: String,
    pub label: String,
    pub id: Uuid,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Node {
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    fn missing(&self, field: &str) -> MappingError {
        MappingError::MissingField {
            label: self.label.clone(),
            field: field.to_string(),
        }
    }

    fn mismatch(&self, field: &str, expected: &'static str, found: &PropertyValue) -> MappingError {
        MappingError::TypeMismatch {
            label: self.label.clone(),
            field: field.to_string(),
            expected,
            found: found.kind(),
        }
    }

    pub fn opt_string(&self, name: &str) -> Result<Option<String>, MappingError> {
        match self.get(name) {
            None => Ok(None),
            Some(PropertyValue::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn string(&self, name: &str) -> Result<String, MappingError> {
        self.opt_string(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn opt_integer(&self, name: &str) -> Result<Option<i64>, MappingError> {
        match self.get(name) {
            None => Ok(None),
            Some(PropertyValue::Integer(i)) => Ok(Some(*i)),
            Some(other) => Err(self.mismatch(name, "integer", other)),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, MappingError> {
        self.opt_integer(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>, MappingError> {
        match self.get(name) {
            None => Ok(None),
            Some(PropertyValue::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mismatch(name, "boolean", other)),
        }
    }

    /// Booleans default to `false` when absent
    pub fn flag(&self, name: &str) -> Result<bool, MappingError> {
        Ok(self.opt_bool(name)?.unwrap_or(false))
    }

    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, MappingError> {
        match self.get(name) {
            None => Ok(None),
            Some(PropertyValue::DateTime(dt)) => Ok(Some(*dt)),
            Some(other) => Err(self.mismatch(name, "datetime", other)),
        }
    }

    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>, MappingError> {
        self.opt_datetime(name)?.ok_or_else(|| self.missing(name))
    }

    /// JSON-valued attributes are stored as strings
    pub fn json(&self, name: &str) -> Result<serde_json::Value, MappingError> {
        let Some(raw) = self.opt_string(name)? else {
            return Ok(serde_json::Value::Null);
        };
        serde_json::from_str(&raw).map_err(|err| MappingError::InvalidJson {
            label: self.label.clone(),
            field: name.to_string(),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), PropertyValue::from("Drill"));
        properties.insert("size".to_string(), PropertyValue::from(12_i64));
        properties.insert("permissions".to_string(), PropertyValue::from(r#"{"loans":{"read":true}}"#));
        Node {
            iri: "urn:assetgraph:node:Equipment:00000000-0000-0000-0000-000000000001".into(),
            label: "Equipment".into(),
            id: Uuid::nil(),
            properties,
        }
    }

    #[test]
    fn typed_getters() {
        let n = node();
        assert_eq!(n.string("name").unwrap(), "Drill");
        assert_eq!(n.integer("size").unwrap(), 12);
        assert_eq!(n.opt_string("barcode").unwrap(), None);
        assert!(!n.flag("isCore").unwrap());
        assert_eq!(n.json("permissions").unwrap()["loans"]["read"], true);
    }

    #[test]
    fn missing_and_mismatch() {
        let n = node();
        assert!(matches!(
            n.string("barcode"),
            Err(MappingError::MissingField { .. })
        ));
        assert!(matches!(
            n.integer("name"),
            Err(MappingError::TypeMismatch { expected: "integer", found: "string", .. })
        ));
    }
}
