//! Entities to JSON:API documents.
//!
//! [`SerializerFactory`] finds the descriptor for a JSON:API type in the
//! registry and hands out a [`ResourceSerializer`] bound to it. The
//! [`JsonApiSerializer`] walks relationships through the factory to build
//! compound documents.

use indexmap::IndexMap;
use serde_json::json;

use super::document::{
    Document, PrimaryData, RelationshipData, RelationshipObject, ResourceIdentifier,
    ResourceLinks, ResourceObject,
};
use super::query::ListQuery;
use super::SerializationError;
use crate::registry::{MODELS, ModelRegistry};
use crate::resource::{ApiEntity, Related, ResourceDescriptor};

pub const DEFAULT_INCLUDE_DEPTH: usize = 2;

/// Serialises entities of one resource type
#[derive(Debug, Clone)]
pub struct ResourceSerializer {
    descriptor: &'static ResourceDescriptor,
    base_url: String,
}

impl ResourceSerializer {
    pub fn descriptor(&self) -> &'static ResourceDescriptor {
        self.descriptor
    }

    /// Build the resource object of `entity`.
    ///
    /// Exactly the attributes declared by the descriptor are emitted, and
    /// each of them must be produced by the entity. With `sparse` set,
    /// relationships without data are left out, as for included resources.
    pub fn resource_object(
        &self,
        entity: &dyn ApiEntity,
        sparse: bool,
    ) -> Result<ResourceObject, SerializationError> {
        let descriptor = self.descriptor;
        if !std::ptr::eq(entity.descriptor(), descriptor) {
            return Err(SerializationError::TypeMismatch {
                expected: descriptor.type_name,
                found: entity.descriptor().type_name,
            });
        }

        let mut produced = entity.attributes();
        let mut attributes = IndexMap::with_capacity(descriptor.attributes.len());
        for &name in descriptor.attributes {
            let value = produced
                .swap_remove(name)
                .ok_or(SerializationError::MissingAttribute {
                    type_name: descriptor.type_name,
                    attribute: name,
                })?;
            attributes.insert(name.to_string(), value);
        }

        let mut relationships = IndexMap::new();
        for (name, related) in entity.relationships() {
            if descriptor.relationship(name).is_none() {
                return Err(SerializationError::UndeclaredRelationship {
                    type_name: descriptor.type_name,
                    relationship: name,
                });
            }
            if sparse && related.is_empty() {
                continue;
            }
            let data = match related {
                Related::One(one) => RelationshipData::One(one.map(identifier)),
                Related::Many(many) => {
                    RelationshipData::Many(many.into_iter().map(identifier).collect())
                }
            };
            relationships.insert(name.to_string(), RelationshipObject { data });
        }

        let id = entity.id();
        let links = descriptor.persisted.then(|| ResourceLinks {
            self_link: format!("{}/{}/{}", self.base_url, descriptor.endpoint, id),
        });

        Ok(ResourceObject {
            type_name: descriptor.type_name.to_string(),
            id,
            attributes,
            relationships,
            links,
        })
    }
}

fn identifier(entity: &dyn ApiEntity) -> ResourceIdentifier {
    ResourceIdentifier {
        type_name: entity.descriptor().type_name.to_string(),
        id: entity.id(),
    }
}

/// Hands out serialisers for registered resource types
#[derive(Debug, Clone)]
pub struct SerializerFactory<'r> {
    registry: &'r ModelRegistry,
    base_url: String,
}

impl<'r> SerializerFactory<'r> {
    pub fn new(registry: &'r ModelRegistry, base_url: impl Into<String>) -> Self {
        Self {
            registry,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn serializer_for(&self, type_name: &str) -> Result<ResourceSerializer, SerializationError> {
        let descriptor = self
            .registry
            .by_type(type_name)
            .map_err(|_| SerializationError::UnknownType(type_name.to_string()))?;
        Ok(ResourceSerializer {
            descriptor,
            base_url: self.base_url.clone(),
        })
    }
}

/// Paging information for collection documents
#[derive(Debug, Clone, Copy)]
pub struct Paging<'q> {
    pub query: &'q ListQuery,
    pub total: u64,
    /// Collection URL without query string
    pub base: &'q str,
}

/// Builds compound documents
#[derive(Debug, Clone)]
pub struct JsonApiSerializer<'r> {
    factory: SerializerFactory<'r>,
    max_depth: usize,
}

impl JsonApiSerializer<'static> {
    /// Serialiser over the process-wide registry
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_registry(&MODELS, base_url)
    }
}

impl<'r> JsonApiSerializer<'r> {
    pub fn with_registry(registry: &'r ModelRegistry, base_url: impl Into<String>) -> Self {
        Self {
            factory: SerializerFactory::new(registry, base_url),
            max_depth: DEFAULT_INCLUDE_DEPTH,
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    fn object(&self, entity: &dyn ApiEntity, sparse: bool) -> Result<ResourceObject, SerializationError> {
        self.factory
            .serializer_for(entity.descriptor().type_name)?
            .resource_object(entity, sparse)
    }

    fn collect_included(
        &self,
        entity: &dyn ApiEntity,
        depth: usize,
        primary: &[ResourceIdentifier],
        included: &mut IndexMap<ResourceIdentifier, ResourceObject>,
    ) -> Result<(), SerializationError> {
        if depth >= self.max_depth {
            return Ok(());
        }
        for (_, related) in entity.relationships() {
            let entities = match related {
                Related::One(one) => one.into_iter().collect(),
                Related::Many(many) => many,
            };
            for child in entities {
                let key = identifier(child);
                if primary.contains(&key) || included.contains_key(&key) {
                    continue;
                }
                included.insert(key, self.object(child, true)?);
                self.collect_included(child, depth + 1, primary, included)?;
            }
        }
        Ok(())
    }

    pub fn single(&self, entity: &dyn ApiEntity) -> Result<Document, SerializationError> {
        let object = self.object(entity, false)?;
        let primary = [object.identifier()];
        let mut included = IndexMap::new();
        self.collect_included(entity, 0, &primary, &mut included)?;

        let mut document = Document::new(PrimaryData::One(Some(object)));
        document.included = included.into_values().collect();
        Ok(document)
    }

    pub fn collection<E: ApiEntity>(
        &self,
        entities: &[E],
        paging: Option<Paging<'_>>,
    ) -> Result<Document, SerializationError> {
        let mut objects = Vec::with_capacity(entities.len());
        for entity in entities {
            objects.push(self.object(entity, false)?);
        }
        let primary: Vec<_> = objects.iter().map(ResourceObject::identifier).collect();

        let mut included = IndexMap::new();
        for entity in entities {
            self.collect_included(entity, 0, &primary, &mut included)?;
        }

        let mut document = Document::new(PrimaryData::Many(objects));
        document.included = included.into_values().collect();

        if let Some(paging) = paging {
            let page = paging.query.page;
            let last = page.last(paging.total);
            let url = |number: usize| paging.query.page_url(paging.base, number);

            document.meta = Some(json!({
                "total": paging.total,
                "page": { "number": page.number, "size": page.size, "last": last },
            }));
            document.links.insert("self", Some(url(page.number)));
            document.links.insert("first", Some(url(1)));
            document
                .links
                .insert("prev", (page.number > 1).then(|| url(page.number - 1)));
            document
                .links
                .insert("next", (page.number < last).then(|| url(page.number + 1)));
            document.links.insert("last", Some(url(last)));
        }

        Ok(document)
    }
}
