//! Static resource metadata.
//!
//! Every resource the API exposes is described by one
//! [`ResourceDescriptor`] living in a `static`. The descriptor ties the
//! JSON:API type, the URL endpoint and the graph label together, lists the
//! attributes the serialiser emits and declares the relationship tokens the
//! mapper resolves.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

use crate::graph::Direction;
use crate::mapper::{MappingError, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Single-child token
    One,
    /// Children token
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Related nodes are always of this JSON:API type
    Resource(&'static str),
    /// Polymorphic: the related node's label picks the resource
    Dynamic,
}

#[derive(Debug)]
pub struct RelationshipDescriptor {
    pub name: &'static str,
    pub edge: &'static str,
    pub direction: Direction,
    pub cardinality: Cardinality,
    pub target: Target,
    /// Accepted in request documents
    pub writable: bool,
}

impl RelationshipDescriptor {
    pub const fn one(name: &'static str, edge: &'static str, target: &'static str) -> Self {
        Self {
            name,
            edge,
            direction: Direction::Outgoing,
            cardinality: Cardinality::One,
            target: Target::Resource(target),
            writable: true,
        }
    }

    pub const fn many(name: &'static str, edge: &'static str, target: &'static str) -> Self {
        Self {
            name,
            edge,
            direction: Direction::Outgoing,
            cardinality: Cardinality::Many,
            target: Target::Resource(target),
            writable: true,
        }
    }

    pub const fn dynamic(name: &'static str, edge: &'static str) -> Self {
        Self {
            name,
            edge,
            direction: Direction::Outgoing,
            cardinality: Cardinality::One,
            target: Target::Dynamic,
            writable: false,
        }
    }

    /// Edge points from the related node to the owner
    pub const fn incoming(mut self) -> Self {
        self.direction = Direction::Incoming;
        self.writable = false;
        self
    }

    pub const fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

/// Which nodes of a resource a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Attached to the caller's company with `BELONGS_TO`
    Company,
    /// The caller's company node itself
    OwnCompany,
    /// Bound to the caller through the named relationship
    Owner(&'static str),
    /// Shared by every tenant
    Global,
}

pub type MapFn = fn(&Record) -> Result<Box<dyn ApiEntity>, MappingError>;

pub struct ResourceDescriptor {
    /// JSON:API `type`
    pub type_name: &'static str,
    /// URL path segment, also the permission module name
    pub endpoint: &'static str,
    /// Graph node label
    pub label: &'static str,
    /// Attributes the serialiser emits, in order
    pub attributes: &'static [&'static str],
    pub relationships: &'static [RelationshipDescriptor],
    pub scope: Scope,
    /// String attributes matched by `filter[search]`
    pub search_fields: &'static [&'static str],
    /// Attributes accepted in `sort`
    pub sortable: &'static [&'static str],
    pub default_sort: &'static str,
    /// Backed by graph nodes; computed resources are not
    pub persisted: bool,
    pub from_record: Option<MapFn>,
}

impl ResourceDescriptor {
    pub fn relationship(&self, name: &str) -> Option<&'static RelationshipDescriptor> {
        self.relationships.iter().find(|rel| rel.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains(&name)
    }

    pub fn is_company_scoped(&self) -> bool {
        self.scope == Scope::Company
    }
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("type_name", &self.type_name)
            .field("endpoint", &self.endpoint)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Related entities as seen by the serialiser
pub enum Related<'a> {
    One(Option<&'a dyn ApiEntity>),
    Many(Vec<&'a dyn ApiEntity>),
}

impl<'a> Related<'a> {
    pub fn one<E: ApiEntity>(value: &'a Option<E>) -> Self {
        Related::One(value.as_ref().map(|e| e as &dyn ApiEntity))
    }

    pub fn boxed(value: &'a Option<Box<dyn ApiEntity>>) -> Self {
        Related::One(value.as_deref())
    }

    pub fn many<E: ApiEntity>(values: &'a [E]) -> Self {
        Related::Many(values.iter().map(|e| e as &dyn ApiEntity).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(value) => value.is_none(),
            Related::Many(values) => values.is_empty(),
        }
    }
}

/// Object-safe view of an entity used by the serialiser
pub trait ApiEntity: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &'static ResourceDescriptor;

    fn id(&self) -> String;

    fn attributes(&self) -> IndexMap<&'static str, Value>;

    fn relationships(&self) -> Vec<(&'static str, Related<'_>)> {
        Vec::new()
    }
}

/// A typed entity with its mapping function
pub trait Entity: ApiEntity + Sized + 'static {
    fn resource() -> &'static ResourceDescriptor;

    fn from_record(record: &Record) -> Result<Self, MappingError>;
}

/// Type-erased mapping function stored in descriptors
pub fn boxed_from_record<E: Entity>(record: &Record) -> Result<Box<dyn ApiEntity>, MappingError> {
    Ok(Box::new(E::from_record(record)?))
}
