//! Resource graph - the declared state of one reconciliation unit
//!
//! Resources form a forest: every resource is either a root or hangs under
//! exactly one parent registered earlier, so cycles cannot be built. The
//! graph owns its resources in an arena and hands out [`NodeId`] handles.
//!
//! Each graph is an explicit value. Two runs never share one implicitly,
//! and the `&mut` borrow taken by a run keeps a second run off it.

use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceKey, ResourceStatus};
use crate::schema::{ResourceSchema, TypeRegistry};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to a resource registered in a [`ResourceGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
impl NodeId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    resource: Resource,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// In-memory registry of declared resources
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    registry: Arc<TypeRegistry>,
    // Removed nodes leave a hole so handles stay stable
    nodes: Vec<Option<Node>>,
    roots: Vec<NodeId>,
    index: HashMap<ResourceKey, NodeId>,
}

impl ResourceGraph {
    /// Create an empty graph over a type registry
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            roots: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create an empty graph over [`TypeRegistry::standard`]
    pub fn with_standard_types() -> Self {
        Self::new(Arc::new(TypeRegistry::standard()))
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Shared handle to the registry
    pub fn registry_arc(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Register a resource with no parent
    pub fn add_root(&mut self, resource: Resource) -> Result<NodeId> {
        let key = resource.identity();
        let schema = self.registry.require(resource.type_name())?;

        if let Some(parent_type) = &schema.parent_type {
            return Err(Error::InvalidParent {
                child: key,
                reason: format!("type requires a parent of type '{parent_type}'"),
            });
        }
        validate_fields(schema, &resource)?;
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateRoot(key));
        }

        let id = self.insert(resource, None);
        self.roots.push(id);
        log::debug!("Registered root {key}");
        Ok(id)
    }

    /// Register `child` under `parent`
    ///
    /// Fails with `DuplicateChild` if a resource with the same identity is
    /// already registered, and with `InvalidParent` if the child's schema
    /// names a different parent type.
    pub fn register_child(&mut self, parent: NodeId, child: Resource) -> Result<NodeId> {
        let parent_key = self.require(parent)?.identity();
        let key = child.identity();
        let schema = self.registry.require(child.type_name())?;

        if schema.parent_type.as_deref() != Some(parent_key.type_name.as_str()) {
            let reason = match &schema.parent_type {
                Some(expected) => {
                    format!("expected a parent of type '{expected}', got {parent_key}")
                }
                None => format!("type '{}' can only be a root", key.type_name),
            };
            return Err(Error::InvalidParent { child: key, reason });
        }
        validate_fields(schema, &child)?;
        if self.index.contains_key(&key) {
            return Err(Error::DuplicateChild {
                parent: parent_key,
                child: key,
            });
        }

        let id = self.insert(child, Some(parent));
        if let Some(node) = self.nodes[parent.0].as_mut() {
            node.children.push(id);
        }
        log::debug!("Registered {key} under {parent_key}");
        Ok(id)
    }

    fn insert(&mut self, resource: Resource, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(resource.identity(), id);
        self.nodes.push(Some(Node {
            resource,
            parent,
            children: Vec::new(),
        }));
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn require(&self, id: NodeId) -> Result<&Resource> {
        self.get(id).ok_or(Error::UnknownNode(id.0))
    }

    /// Get a resource by handle
    pub fn get(&self, id: NodeId) -> Option<&Resource> {
        self.node(id).map(|n| &n.resource)
    }

    /// Get a resource by handle for editing its fields
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Resource> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|n| &mut n.resource)
    }

    /// Find a resource by identity
    pub fn find(&self, type_name: &str, name: &str) -> Option<NodeId> {
        self.find_key(&ResourceKey::new(type_name, name))
    }

    pub fn find_key(&self, key: &ResourceKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Children of a resource, in registration order
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| n.children.as_slice())
    }

    /// Children of a resource with the given type
    pub fn children_of_type<'a>(
        &'a self,
        id: NodeId,
        type_name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.get(c).is_some_and(|r| r.type_name() == type_name))
    }

    /// Look up a child by type and name
    pub fn child(&self, id: NodeId, type_name: &str, name: &str) -> Option<NodeId> {
        self.children_of_type(id, type_name)
            .find(|&c| self.get(c).is_some_and(|r| r.name() == name))
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Schema of a resource's type
    pub fn schema(&self, id: NodeId) -> Option<&ResourceSchema> {
        self.get(id).and_then(|r| self.registry.get(r.type_name()))
    }

    /// All resources of a type, in registration order
    pub fn resources_of_type(&self, type_name: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
            .filter(|(_, n)| n.resource.type_name() == type_name)
            .map(|(id, _)| id)
            .collect()
    }

    /// Parents before children; the order creates and updates are planned in
    pub fn walk_preorder(&self) -> Preorder<'_> {
        Preorder {
            graph: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    /// Children before parents; the order deletes are planned in
    pub fn walk_postorder(&self) -> Postorder<'_> {
        self.postorder_from(&self.roots)
    }

    fn postorder_from(&self, start: &[NodeId]) -> Postorder<'_> {
        Postorder {
            graph: self,
            stack: start.iter().rev().map(|&id| (id, false)).collect(),
        }
    }

    /// Remove a resource and everything below it
    ///
    /// Returns the removed resources, children before parents.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<Resource>> {
        self.require(id)?;
        let doomed: Vec<NodeId> = self.postorder_from(&[id]).collect();

        match self.parent(id) {
            Some(parent) => {
                if let Some(node) = self.nodes[parent.0].as_mut() {
                    node.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&r| r != id),
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for node_id in doomed {
            if let Some(node) = self.nodes[node_id.0].take() {
                self.index.remove(&node.resource.identity());
                log::debug!("Removed {}", node.resource.identity());
                removed.push(node.resource);
            }
        }
        Ok(removed)
    }

    /// Re-check every resource against its schema
    ///
    /// Fields can be edited after registration, so this runs before any
    /// remote call is made.
    pub fn validate(&self) -> Result<()> {
        for id in self.walk_preorder() {
            if let Some(resource) = self.get(id) {
                let schema = self.registry.require(resource.type_name())?;
                validate_fields(schema, resource)?;
            }
        }
        Ok(())
    }

    /// Start a fresh run: finished resources go back to `Declared`
    pub(crate) fn reset_statuses(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.resource.set_status(ResourceStatus::Declared);
        }
    }

    pub(crate) fn set_status(&mut self, id: NodeId, status: ResourceStatus) {
        if let Some(resource) = self.get_mut(id) {
            resource.set_status(status);
        }
    }

    pub(crate) fn set_id(&mut self, id: NodeId, server_id: &str) {
        if let Some(resource) = self.get_mut(id) {
            resource.set_id(server_id);
        }
    }

    pub(crate) fn clear_id(&mut self, id: NodeId) {
        if let Some(resource) = self.get_mut(id) {
            resource.clear_id();
        }
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Check a resource's fields are exactly accounted for by its schema
fn validate_fields(schema: &ResourceSchema, resource: &Resource) -> Result<()> {
    for field in resource.fields().keys() {
        if schema.descriptor(field).is_none() {
            return Err(Error::FieldClassification {
                type_name: schema.type_name.clone(),
                field: field.clone(),
                reason: format!(
                    "set on {} but declared neither mutable nor immutable",
                    resource.identity()
                ),
            });
        }
    }
    for descriptor in schema.fields.iter().filter(|f| f.required) {
        if resource.field(&descriptor.name).is_none() {
            return Err(Error::FieldClassification {
                type_name: schema.type_name.clone(),
                field: descriptor.name.clone(),
                reason: format!("required field missing on {}", resource.identity()),
            });
        }
    }
    Ok(())
}

/// Lazy preorder walk over a graph; see [`ResourceGraph::walk_preorder`]
pub struct Preorder<'a> {
    graph: &'a ResourceGraph,
    stack: Vec<NodeId>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.graph.children(id).iter().rev().copied());
        Some(id)
    }
}

/// Lazy postorder walk over a graph; see [`ResourceGraph::walk_postorder`]
pub struct Postorder<'a> {
    graph: &'a ResourceGraph,
    // (node, children already pushed)
    stack: Vec<(NodeId, bool)>,
}

impl Iterator for Postorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let (id, expanded) = self.stack.pop()?;
            if expanded {
                return Some(id);
            }
            self.stack.push((id, true));
            self.stack
                .extend(self.graph.children(id).iter().rev().map(|&c| (c, false)));
        }
    }
}
