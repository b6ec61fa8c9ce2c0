//! Typed property values and their RDF literal form

use chrono::{DateTime, SecondsFormat, Utc};
use oxigraph::model::Term;
use serde::Serialize;
use std::fmt;

use super::sanitize::escape_literal;

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// A single node property as stored in the graph
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
}

impl PropertyValue {
    /// Render as a SPARQL literal usable inside a query or update
    pub fn to_sparql(&self) -> String {
        match self {
            PropertyValue::String(s) => format!("\"{}\"", escape_literal(s)),
            PropertyValue::Integer(i) => format!("\"{i}\"^^<{XSD_INTEGER}>"),
            PropertyValue::Float(f) => format!("\"{f:?}\"^^<{XSD_DOUBLE}>"),
            PropertyValue::Boolean(b) => format!("\"{b}\"^^<{XSD_BOOLEAN}>"),
            PropertyValue::DateTime(dt) => format!(
                "\"{}\"^^<{XSD_DATE_TIME}>",
                dt.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        }
    }

    /// Decode an RDF term; IRIs and blank nodes are not property values
    pub fn from_term(term: &Term) -> Option<Self> {
        let Term::Literal(literal) = term else {
            return None;
        };
        let value = literal.value();
        let decoded = match literal.datatype().as_str() {
            XSD_INTEGER => value.parse().ok().map(PropertyValue::Integer),
            XSD_DOUBLE | XSD_DECIMAL => value.parse().ok().map(PropertyValue::Float),
            XSD_BOOLEAN => match value {
                "true" | "1" => Some(PropertyValue::Boolean(true)),
                "false" | "0" => Some(PropertyValue::Boolean(false)),
                _ => None,
            },
            XSD_DATE_TIME => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| PropertyValue::DateTime(dt.with_timezone(&Utc))),
            _ => None,
        };
        Some(decoded.unwrap_or_else(|| PropertyValue::String(value.to_string())))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::Boolean(_) => "boolean",
            PropertyValue::DateTime(_) => "datetime",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::DateTime(dt) => {
                f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oxigraph::model::{Literal, NamedNode};

    #[test]
    fn string_literals_are_escaped() {
        let v = PropertyValue::from("say \"hi\"\n");
        assert_eq!(v.to_sparql(), r#""say \"hi\"\n""#);
    }

    #[test]
    fn typed_literals_decode() {
        let int = Term::Literal(Literal::new_typed_literal(
            "42",
            NamedNode::new_unchecked(XSD_INTEGER),
        ));
        assert_eq!(PropertyValue::from_term(&int), Some(PropertyValue::Integer(42)));

        let flag = Term::Literal(Literal::new_typed_literal(
            "true",
            NamedNode::new_unchecked(XSD_BOOLEAN),
        ));
        assert_eq!(PropertyValue::from_term(&flag), Some(PropertyValue::Boolean(true)));

        let when = Term::Literal(Literal::new_typed_literal(
            "2024-03-01T10:00:00.000Z",
            NamedNode::new_unchecked(XSD_DATE_TIME),
        ));
        assert_eq!(
            PropertyValue::from_term(&when),
            Some(PropertyValue::DateTime(
                Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn iris_are_not_values() {
        let iri = Term::NamedNode(NamedNode::new_unchecked("urn:x"));
        assert_eq!(PropertyValue::from_term(&iri), None);
    }

    #[test]
    fn plain_literal_is_string() {
        let plain = Term::Literal(Literal::new_simple_literal("Drill"));
        assert_eq!(
            PropertyValue::from_term(&plain),
            Some(PropertyValue::String("Drill".into()))
        );
    }
}
