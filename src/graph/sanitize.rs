//! Escaping and IRI construction for SPARQL text built by string templates.
//!
//! Caller input only ever reaches a query in two shapes: as an escaped string
//! literal, or as part of an IRI assembled from a validated identifier and a
//! parsed [`Uuid`]. Nothing else is interpolated.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use super::StoreError;

pub const NODE_PREFIX: &str = "urn:assetgraph:node:";
pub const LABEL_PREFIX: &str = "urn:assetgraph:label:";
pub const PROP_PREFIX: &str = "urn:assetgraph:prop:";
pub const REL_PREFIX: &str = "urn:assetgraph:rel:";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

const MAX_IDENTIFIER_LEN: usize = 64;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("identifier regex"));

/// Escape a string for use inside a double-quoted SPARQL literal
pub fn escape_literal(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len() + 8);
    for ch in input.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Escape a string for use inside a SPARQL `REGEX` pattern literal
pub fn escape_regex_literal(input: &str) -> String {
    escape_literal(&regex::escape(input))
}

/// Labels, property names and edge names must be plain identifiers
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), StoreError> {
    if value.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

pub fn node_iri(label: &str, id: Uuid) -> String {
    format!("{NODE_PREFIX}{label}:{id}")
}

pub fn label_iri(label: &str) -> String {
    format!("{LABEL_PREFIX}{label}")
}

pub fn prop_iri(name: &str) -> String {
    format!("{PROP_PREFIX}{name}")
}

pub fn rel_iri(edge: &str) -> String {
    format!("{REL_PREFIX}{edge}")
}

/// Split a node IRI into its label and id
pub fn parse_node_iri(iri: &str) -> Option<(&str, Uuid)> {
    let rest = iri.strip_prefix(NODE_PREFIX)?;
    let (label, id) = rest.split_once(':')?;
    if !IDENTIFIER_RE.is_match(label) {
        return None;
    }
    Some((label, Uuid::parse_str(id).ok()?))
}

pub fn label_from_iri(iri: &str) -> Option<&str> {
    iri.strip_prefix(LABEL_PREFIX)
}

pub fn prop_from_iri(iri: &str) -> Option<&str> {
    iri.strip_prefix(PROP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn identifiers() {
        assert!(validate_identifier("label", "Equipment").is_ok());
        assert!(validate_identifier("edge", "LOANED_TO").is_ok());
        assert!(validate_identifier("prop", "first name").is_err());
        assert!(validate_identifier("prop", "x> } ; DROP ALL").is_err());
        assert!(validate_identifier("prop", "9lives").is_err());
    }

    #[test]
    fn node_iri_round_trip() {
        let id = Uuid::new_v4();
        let iri = node_iri("Loan", id);
        assert_eq!(parse_node_iri(&iri), Some(("Loan", id)));
        assert_eq!(parse_node_iri("urn:assetgraph:node:Loan:nope"), None);
        assert_eq!(parse_node_iri("http://example.com/x"), None);
    }

    #[test]
    fn regex_literal_escapes_metacharacters() {
        assert_eq!(escape_regex_literal("a.b"), "a\\\\.b");
    }

    proptest! {
        #[test]
        fn escaped_literal_never_terminates_early(input in ".*") {
            let escaped = escape_literal(&input);
            let mut chars = escaped.chars();
            while let Some(ch) = chars.next() {
                match ch {
                    '\\' => { chars.next(); }
                    '"' | '\n' | '\r' => prop_assert!(false, "unescaped {ch:?} in {escaped:?}"),
                    _ => {}
                }
            }
        }
    }
}
