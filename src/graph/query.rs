//! SPARQL query and update builders.
//!
//! Patterns are assembled from IRIs built by [`super::sanitize`] and literals
//! rendered by [`super::PropertyValue::to_sparql`]; the builders only arrange
//! the text.

use super::Direction;
use super::sanitize::rel_iri;

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryType {
    Select,
    Count(String),
    Ask,
}

/// Builder for SELECT, COUNT and ASK queries
///
/// ```rust
/// use assetgraph::graph::QueryBuilder;
///
/// let query = QueryBuilder::select()
///     .variable("?node")
///     .pattern("?node a <urn:assetgraph:label:Loan>")
///     .limit(10)
///     .build();
/// assert!(query.contains("LIMIT 10"));
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query_type: QueryType,
    variables: Vec<String>,
    patterns: Vec<String>,
    filters: Vec<String>,
    order_by: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    distinct: bool,
    var_counter: usize,
}

impl QueryBuilder {
    fn with_type(query_type: QueryType) -> Self {
        Self {
            query_type,
            variables: Vec::new(),
            patterns: Vec::new(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            var_counter: 0,
        }
    }

    pub fn select() -> Self {
        Self::with_type(QueryType::Select)
    }

    /// `SELECT (COUNT(DISTINCT var) AS ?count)`
    pub fn count(var: &str) -> Self {
        Self::with_type(QueryType::Count(var.to_string()))
    }

    pub fn ask() -> Self {
        Self::with_type(QueryType::Ask)
    }

    pub fn variable(mut self, var: &str) -> Self {
        self.variables.push(var.to_string());
        self
    }

    /// Add a triple pattern (without the trailing dot)
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(format!("{} .", pattern.into()));
        self
    }

    pub fn optional(mut self, pattern: impl Into<String>) -> Self {
        self.patterns
            .push(format!("OPTIONAL {{ {} }}", pattern.into()));
        self
    }

    /// Add a group pattern verbatim, e.g. a `UNION` of two blocks
    pub fn block(mut self, block: impl Into<String>) -> Self {
        self.patterns.push(block.into());
        self
    }

    /// Follow `edge` from `from` to `to` in the given direction
    pub fn edge(self, from: &str, edge: &str, direction: Direction, to: &str) -> Self {
        let rel = rel_iri(edge);
        match direction {
            Direction::Outgoing => self.pattern(format!("{from} <{rel}> {to}")),
            Direction::Incoming => self.pattern(format!("{to} <{rel}> {from}")),
        }
    }

    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filters.push(expression.into());
        self
    }

    /// Add an ORDER BY key, e.g. `?name` or `DESC(?createdAt)`
    pub fn order_by(mut self, key: impl Into<String>) -> Self {
        self.order_by.push(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// A variable name not used by any earlier call
    pub fn fresh_var(&mut self, prefix: &str) -> String {
        self.var_counter += 1;
        format!("?{prefix}{}", self.var_counter)
    }

    pub fn build(self) -> String {
        let mut query = String::new();

        match &self.query_type {
            QueryType::Select => {
                query.push_str("SELECT ");
                if self.distinct {
                    query.push_str("DISTINCT ");
                }
                if self.variables.is_empty() {
                    query.push('*');
                } else {
                    query.push_str(&self.variables.join(" "));
                }
                query.push('\n');
            }
            QueryType::Count(var) => {
                query.push_str(&format!("SELECT (COUNT(DISTINCT {var}) AS ?count)\n"));
            }
            QueryType::Ask => query.push_str("ASK\n"),
        }

        query.push_str("WHERE {\n");
        for pattern in &self.patterns {
            query.push_str("  ");
            query.push_str(pattern);
            query.push('\n');
        }
        for filter in &self.filters {
            query.push_str("  FILTER (");
            query.push_str(filter);
            query.push_str(")\n");
        }
        query.push_str("}\n");

        if matches!(self.query_type, QueryType::Select) {
            if !self.order_by.is_empty() {
                query.push_str("ORDER BY ");
                query.push_str(&self.order_by.join(" "));
                query.push('\n');
            }
            if let Some(limit) = self.limit {
                query.push_str(&format!("LIMIT {limit}\n"));
            }
            if let Some(offset) = self.offset {
                query.push_str(&format!("OFFSET {offset}\n"));
            }
        }

        query
    }
}

/// Builder for a SPARQL update request made of several operations.
///
/// Deletes are emitted in the order they were added, followed by one
/// `INSERT DATA` block holding every inserted triple.
#[derive(Debug, Clone, Default)]
pub struct UpdateBuilder {
    deletes: Vec<String>,
    inserts: Vec<String>,
}

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `<subject> <predicate> object`; `object` is an IRI in angle
    /// brackets or a rendered literal
    pub fn insert(mut self, subject: &str, predicate: &str, object: impl Into<String>) -> Self {
        self.inserts
            .push(format!("<{subject}> <{predicate}> {} .", object.into()));
        self
    }

    /// Remove every value of one property
    pub fn delete_property(mut self, subject: &str, predicate: &str) -> Self {
        self.deletes
            .push(format!("DELETE WHERE {{ <{subject}> <{predicate}> ?o . }}"));
        self
    }

    /// Remove every `edge` relationship touching `node` in one direction
    pub fn delete_edges(mut self, node: &str, edge: &str, direction: Direction) -> Self {
        let rel = rel_iri(edge);
        self.deletes.push(match direction {
            Direction::Outgoing => format!("DELETE WHERE {{ <{node}> <{rel}> ?o . }}"),
            Direction::Incoming => format!("DELETE WHERE {{ ?s <{rel}> <{node}> . }}"),
        });
        self
    }

    /// Remove a node with its properties and every edge in either direction
    pub fn delete_node(mut self, node: &str) -> Self {
        self.deletes
            .push(format!("DELETE WHERE {{ <{node}> ?p ?o . }}"));
        self.deletes
            .push(format!("DELETE WHERE {{ ?s ?p <{node}> . }}"));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }

    pub fn build(self) -> String {
        let mut operations = self.deletes;
        if !self.inserts.is_empty() {
            operations.push(format!("INSERT DATA {{\n  {}\n}}", self.inserts.join("\n  ")));
        }
        operations.join(" ;\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_paging() {
        let query = QueryBuilder::select()
            .distinct()
            .variable("?node")
            .pattern("?node a <urn:assetgraph:label:Employee>")
            .optional("?node <urn:assetgraph:prop:lastName> ?sort0")
            .filter("BOUND(?node)")
            .order_by("ASC(?sort0)")
            .limit(25)
            .offset(50)
            .build();

        assert!(query.starts_with("SELECT DISTINCT ?node\nWHERE {"));
        assert!(query.contains("OPTIONAL { ?node <urn:assetgraph:prop:lastName> ?sort0 }"));
        assert!(query.contains("FILTER (BOUND(?node))"));
        assert!(query.contains("ORDER BY ASC(?sort0)\nLIMIT 25\nOFFSET 50"));
    }

    #[test]
    fn count_ignores_paging() {
        let query = QueryBuilder::count("?node")
            .pattern("?node a <urn:assetgraph:label:Loan>")
            .limit(10)
            .build();
        assert!(query.starts_with("SELECT (COUNT(DISTINCT ?node) AS ?count)"));
        assert!(!query.contains("LIMIT"));
    }

    #[test]
    fn incoming_edge_swaps_ends() {
        let query = QueryBuilder::ask()
            .edge("?equipment", "LOAN_OF", Direction::Incoming, "?loan")
            .build();
        assert!(query.contains("?loan <urn:assetgraph:rel:LOAN_OF> ?equipment ."));
    }

    #[test]
    fn fresh_vars_are_unique() {
        let mut builder = QueryBuilder::select();
        let a = builder.fresh_var("f");
        let b = builder.fresh_var("f");
        assert_ne!(a, b);
    }

    #[test]
    fn update_orders_deletes_before_inserts() {
        let update = UpdateBuilder::new()
            .insert("urn:n", "urn:p", "\"v\"")
            .delete_property("urn:n", "urn:p")
            .build();
        let delete_at = update.find("DELETE WHERE").expect("delete");
        let insert_at = update.find("INSERT DATA").expect("insert");
        assert!(delete_at < insert_at);
        assert!(update.contains(" ;\n"));
    }

    #[test]
    fn empty_update() {
        assert!(UpdateBuilder::new().is_empty());
        assert_eq!(UpdateBuilder::new().build(), "");
    }
}
