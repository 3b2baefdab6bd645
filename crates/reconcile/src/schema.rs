//! Per-type resource schemas and the type registry
//!
//! Every resource type is described by an ordered list of field
//! descriptors, each tagged mutable or immutable. Schemas are checked once,
//! when they are registered, so a field can never be both or neither.
//!
//! The registry is closed after construction and enumerable. Its
//! registration order doubles as the dependency order used when fetching
//! deployed state: a child type can only be registered after its parent.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Whether a field can be changed in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Updated in place
    Mutable,
    /// Fixed at creation; a change forces delete + recreate
    Immutable,
}

/// Declaration of a single persisted field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub mutability: Mutability,
    /// Value is redacted when displayed
    #[serde(default)]
    pub secret: bool,
    /// Resources of this type must set the field
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldDescriptor {
    pub fn mutable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mutability: Mutability::Mutable,
            secret: false,
            required: true,
        }
    }

    pub fn immutable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mutability: Mutability::Immutable,
            secret: false,
            required: true,
        }
    }

    /// Mark the field as secret
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Mark the field as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn is_immutable(&self) -> bool {
        self.mutability == Mutability::Immutable
    }
}

/// Schema of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub type_name: String,
    /// Type every resource of this type hangs under; `None` for root types
    pub parent_type: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl ResourceSchema {
    /// Schema for a type registered at the root of the graph
    pub fn root(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parent_type: None,
            fields: Vec::new(),
        }
    }

    /// Schema for a type that always has a parent of `parent_type`
    pub fn child(type_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            parent_type: Some(parent_type.into()),
            fields: Vec::new(),
        }
    }

    /// Append a field descriptor
    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    /// Look up a field descriptor by name
    pub fn descriptor(&self, field: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == field)
    }

    /// Names of fields that force replacement when they change
    pub fn immutable_fields(&self) -> BTreeSet<&str> {
        self.names_where(FieldDescriptor::is_immutable)
    }

    /// Names of fields that can be updated in place
    pub fn mutable_fields(&self) -> BTreeSet<&str> {
        self.names_where(|f| !f.is_immutable())
    }

    /// Names of fields whose values are redacted in plans
    pub fn secret_fields(&self) -> BTreeSet<&str> {
        self.names_where(|f| f.secret)
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.descriptor(field).is_some_and(FieldDescriptor::is_immutable)
    }

    pub fn is_secret(&self, field: &str) -> bool {
        self.descriptor(field).is_some_and(|f| f.secret)
    }

    fn names_where(&self, predicate: impl Fn(&FieldDescriptor) -> bool) -> BTreeSet<&str> {
        self.fields
            .iter()
            .filter(|f| predicate(*f))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Check the schema is self-consistent
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in &self.fields {
            if descriptor.name.trim().is_empty() {
                return Err(Error::FieldClassification {
                    type_name: self.type_name.clone(),
                    field: descriptor.name.clone(),
                    reason: "field name is empty".to_string(),
                });
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(Error::FieldClassification {
                    type_name: self.type_name.clone(),
                    field: descriptor.name.clone(),
                    reason: "field is declared more than once".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The closed set of resource types a graph may contain
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    schemas: Vec<ResourceSchema>,
    index: HashMap<String, usize>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type
    ///
    /// Fails if the type is already registered, if its parent type has not
    /// been registered yet, or if its fields are not classified exactly once.
    pub fn register(&mut self, schema: ResourceSchema) -> Result<()> {
        if schema.type_name.trim().is_empty() {
            return Err(Error::UnknownResourceType(schema.type_name));
        }
        if self.index.contains_key(&schema.type_name) {
            return Err(Error::DuplicateResourceType(schema.type_name));
        }
        if let Some(parent) = &schema.parent_type
            && !self.index.contains_key(parent)
        {
            return Err(Error::UnknownResourceType(parent.clone()));
        }
        schema.validate()?;

        log::debug!(
            "Registered resource type {} ({} fields)",
            schema.type_name,
            schema.fields.len()
        );
        self.index
            .insert(schema.type_name.clone(), self.schemas.len());
        self.schemas.push(schema);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, schema: ResourceSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Get the schema of a type
    pub fn get(&self, type_name: &str) -> Option<&ResourceSchema> {
        self.index.get(type_name).map(|&i| &self.schemas[i])
    }

    /// Get the schema of a type, or fail with `UnknownResourceType`
    pub fn require(&self, type_name: &str) -> Result<&ResourceSchema> {
        self.get(type_name)
            .ok_or_else(|| Error::UnknownResourceType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.index.contains_key(type_name)
    }

    /// Schemas in dependency order (parent types before child types)
    pub fn iter(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.schemas.iter()
    }

    /// Types whose schema names `type_name` as parent
    pub fn child_types(&self, type_name: &str) -> impl Iterator<Item = &ResourceSchema> {
        self.schemas
            .iter()
            .filter(move |s| s.parent_type.as_deref() == Some(type_name))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registry with the standard monitoring resource types
    ///
    /// ```text
    /// Credential ── Source ──┬── Window
    ///                        ├── Segmentation
    ///                        └── Validator
    /// Channel ── NotificationRule
    /// ```
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for schema in standard_schemas() {
            // The standard schemas are fixed and covered by tests
            if let Err(e) = registry.register(schema) {
                log::error!("Invalid standard schema: {e}");
            }
        }
        registry
    }
}

fn standard_schemas() -> Vec<ResourceSchema> {
    use FieldDescriptor as F;

    vec![
        ResourceSchema::root("Credential")
            .field(F::immutable("kind"))
            .field(F::mutable("display_name").optional())
            .field(F::mutable("secret").secret()),
        ResourceSchema::root("Channel")
            .field(F::immutable("kind"))
            .field(F::mutable("display_name").optional())
            .field(F::mutable("webhook_url"))
            .field(F::mutable("auth_header").secret().optional()),
        ResourceSchema::child("Source", "Credential")
            .field(F::immutable("kind"))
            .field(F::immutable("table"))
            .field(F::mutable("display_name").optional())
            .field(F::mutable("schedule").optional())
            .field(F::mutable("jtd_schema").optional()),
        ResourceSchema::child("Window", "Source")
            .field(F::immutable("kind"))
            .field(F::immutable("data_time_field").optional())
            .field(F::mutable("display_name").optional())
            .field(F::mutable("window_size").optional()),
        ResourceSchema::child("Segmentation", "Source")
            .field(F::immutable("fields"))
            .field(F::mutable("display_name").optional()),
        ResourceSchema::child("Validator", "Source")
            .field(F::immutable("kind"))
            .field(F::immutable("metric"))
            .field(F::mutable("display_name").optional())
            .field(F::mutable("threshold")),
        ResourceSchema::child("NotificationRule", "Channel")
            .field(F::mutable("display_name").optional())
            .field(F::mutable("conditions").optional()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_dependency_order() {
        let registry = TypeRegistry::standard();
        assert_eq!(registry.len(), 7);

        let order: Vec<&str> = registry.iter().map(|s| s.type_name.as_str()).collect();
        let pos = |t: &str| order.iter().position(|o| *o == t).unwrap();
        for schema in registry.iter() {
            if let Some(parent) = &schema.parent_type {
                assert!(pos(parent) < pos(&schema.type_name));
            }
        }
    }

    #[test]
    fn test_field_partitions_are_disjoint() {
        let registry = TypeRegistry::standard();
        for schema in registry.iter() {
            let immutable = schema.immutable_fields();
            let mutable = schema.mutable_fields();
            assert!(immutable.is_disjoint(&mutable));
            assert_eq!(immutable.len() + mutable.len(), schema.fields.len());
        }
    }

    #[test]
    fn test_channel_schema() {
        let registry = TypeRegistry::standard();
        let channel = registry.get("Channel").unwrap();
        assert!(channel.is_immutable("kind"));
        assert!(!channel.is_immutable("webhook_url"));
        assert!(channel.is_secret("auth_header"));
        assert_eq!(
            registry
                .child_types("Channel")
                .map(|s| s.type_name.as_str())
                .collect::<Vec<_>>(),
            vec!["NotificationRule"]
        );
    }

    #[test]
    fn test_register_rejects_double_classification() {
        let mut registry = TypeRegistry::new();
        let schema = ResourceSchema::root("Thing")
            .field(FieldDescriptor::mutable("size"))
            .field(FieldDescriptor::immutable("size"));

        let err = registry.register(schema).unwrap_err();
        assert!(matches!(
            err,
            Error::FieldClassification { ref field, .. } if field == "size"
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_empty_field_name() {
        let schema = ResourceSchema::root("Thing").field(FieldDescriptor::mutable(" "));
        assert!(matches!(
            TypeRegistry::new().register(schema),
            Err(Error::FieldClassification { .. })
        ));
    }

    #[test]
    fn test_register_requires_parent_first() {
        let mut registry = TypeRegistry::new();
        let err = registry
            .register(ResourceSchema::child("Rule", "Channel"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownResourceType(ref t) if t == "Channel"));
    }

    #[test]
    fn test_register_rejects_duplicate_type() {
        let registry = TypeRegistry::new()
            .with(ResourceSchema::root("Channel"))
            .unwrap();
        let err = registry.with(ResourceSchema::root("Channel")).unwrap_err();
        assert!(matches!(err, Error::DuplicateResourceType(_)));
    }
}
