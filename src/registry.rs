//! Process-wide model registry.
//!
//! Feature modules register their descriptors at start-up; the serialiser,
//! the mapper (for polymorphic relations) and the router look them up by
//! JSON:API type, endpoint or graph label.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::resource::ResourceDescriptor;

pub static MODELS: Lazy<ModelRegistry> = Lazy::new(ModelRegistry::new);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("{kind} '{key}' is already registered to a different model")]
    Conflict { kind: &'static str, key: String },
}

type Index = HashMap<&'static str, &'static ResourceDescriptor>;

#[derive(Debug, Default)]
struct Indexes {
    by_type: Index,
    by_endpoint: Index,
    by_label: Index,
    order: Vec<&'static ResourceDescriptor>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    inner: RwLock<Indexes>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under its type, endpoint and label.
    ///
    /// Registering the same descriptor twice is a no-op; a different
    /// descriptor claiming a taken key is rejected and nothing is inserted.
    pub fn register(&self, descriptor: &'static ResourceDescriptor) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        let keys: [(&'static str, &Index, &'static str); 3] = [
            ("type", &inner.by_type, descriptor.type_name),
            ("endpoint", &inner.by_endpoint, descriptor.endpoint),
            ("label", &inner.by_label, descriptor.label),
        ];

        let mut already_registered = true;
        for (kind, index, key) in keys {
            match index.get(key) {
                Some(existing) if std::ptr::eq(*existing, descriptor) => {}
                Some(_) => {
                    return Err(RegistryError::Conflict {
                        kind,
                        key: key.to_string(),
                    });
                }
                None => already_registered = false,
            }
        }
        if already_registered {
            return Ok(());
        }

        inner.by_type.insert(descriptor.type_name, descriptor);
        inner.by_endpoint.insert(descriptor.endpoint, descriptor);
        inner.by_label.insert(descriptor.label, descriptor);
        inner.order.push(descriptor);
        tracing::debug!(resource = descriptor.type_name, "model registered");
        Ok(())
    }

    pub fn by_type(&self, type_name: &str) -> Result<&'static ResourceDescriptor, RegistryError> {
        self.inner
            .read()
            .by_type
            .get(type_name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownResource(type_name.to_string()))
    }

    pub fn by_endpoint(&self, endpoint: &str) -> Result<&'static ResourceDescriptor, RegistryError> {
        self.inner
            .read()
            .by_endpoint
            .get(endpoint)
            .copied()
            .ok_or_else(|| RegistryError::UnknownResource(endpoint.to_string()))
    }

    pub fn by_label(&self, label: &str) -> Result<&'static ResourceDescriptor, RegistryError> {
        self.inner
            .read()
            .by_label
            .get(label)
            .copied()
            .ok_or_else(|| RegistryError::UnknownResource(label.to_string()))
    }

    /// Registered descriptors in registration order
    pub fn descriptors(&self) -> Vec<&'static ResourceDescriptor> {
        self.inner.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Scope;

    macro_rules! descriptor {
        ($name:ident, $type:literal, $endpoint:literal, $label:literal) => {
            static $name: ResourceDescriptor = ResourceDescriptor {
                type_name: $type,
                endpoint: $endpoint,
                label: $label,
                attributes: &[],
                relationships: &[],
                scope: Scope::Global,
                search_fields: &[],
                sortable: &[],
                default_sort: "",
                persisted: true,
                from_record: None,
            };
        };
    }

    descriptor!(GADGETS, "gadgets", "gadgets", "Gadget");
    descriptor!(GIZMOS, "gizmos", "gizmos", "Gizmo");
    descriptor!(IMPOSTOR, "gadgets-v2", "gadgets", "GadgetTwo");

    #[test]
    fn lookups_after_register() {
        let registry = ModelRegistry::new();
        registry.register(&GADGETS).unwrap();
        registry.register(&GIZMOS).unwrap();

        assert!(std::ptr::eq(registry.by_endpoint("gadgets").unwrap(), &GADGETS));
        assert!(std::ptr::eq(registry.by_type("gizmos").unwrap(), &GIZMOS));
        assert!(std::ptr::eq(registry.by_label("Gadget").unwrap(), &GADGETS));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let registry = ModelRegistry::new();
        registry.register(&GADGETS).unwrap();
        registry.register(&GADGETS).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_key_is_rejected() {
        let registry = ModelRegistry::new();
        registry.register(&GADGETS).unwrap();
        let err = registry.register(&IMPOSTOR).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Conflict {
                kind: "endpoint",
                key: "gadgets".into()
            }
        );
        assert!(registry.by_type("gadgets-v2").is_err());
        assert!(std::ptr::eq(registry.by_endpoint("gadgets").unwrap(), &GADGETS));
    }

    #[test]
    fn unknown_resource() {
        let registry = ModelRegistry::new();
        assert_eq!(
            registry.by_endpoint("nope").unwrap_err(),
            RegistryError::UnknownResource("nope".into())
        );
    }
}
