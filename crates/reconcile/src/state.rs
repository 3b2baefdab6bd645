//! Deployed state - the collaborator interfaces and the fetched forest
//!
//! The engine never talks to a concrete backend. It reads deployed state
//! through a [`StateFetcher`] and changes it through a [`RemoteApi`]; both
//! are implemented by the caller.

use crate::error::{ApiError, Error, FetchError, Result};
use crate::resource::{Fields, ResourceKey};
use crate::schema::TypeRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A deployed resource as reported by a [`StateFetcher`]
///
/// Secret field values are not expected here; see
/// [`StateFetcher::secret_changed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedResource {
    pub name: String,
    /// Server-assigned id
    pub id: String,
    /// Ownership scope reported by the remote system, if it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub mutable_fields: Fields,
    #[serde(default)]
    pub immutable_fields: Fields,
}

impl FetchedResource {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            namespace: None,
            mutable_fields: Fields::new(),
            immutable_fields: Fields::new(),
        }
    }

    /// Whether a run scoped to `namespace` may change this resource
    ///
    /// Resources without a namespace, and runs without one, always match.
    pub fn owned_by(&self, namespace: Option<&str>) -> bool {
        match (namespace, self.namespace.as_deref()) {
            (Some(current), Some(found)) => current == found,
            _ => true,
        }
    }

    /// Mutable and immutable fields merged into one map
    pub fn fields(&self) -> Fields {
        let mut fields = self.immutable_fields.clone();
        fields.extend(
            self.mutable_fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        fields
    }
}

/// Reads deployed state
pub trait StateFetcher {
    /// List deployed resources of `type_name`
    ///
    /// Root types are fetched with `parent_id = None`; child types are
    /// fetched once per deployed parent.
    fn fetch(
        &self,
        type_name: &str,
        parent_id: Option<&str>,
    ) -> std::result::Result<Vec<FetchedResource>, FetchError>;

    /// Whether the deployed secret values of resource `id` differ from `secrets`
    ///
    /// Remote systems do not report secret values back, so fetched resources
    /// carry none and the differ asks here instead. Fetchers that cannot tell
    /// report no change.
    fn secret_changed(
        &self,
        _type_name: &str,
        _id: &str,
        _secrets: &Fields,
    ) -> std::result::Result<bool, FetchError> {
        Ok(false)
    }
}

/// Changes deployed state
pub trait RemoteApi {
    /// Create a resource and return its server-assigned id
    fn create(
        &self,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: &Fields,
    ) -> std::result::Result<String, ApiError>;

    /// Apply changed mutable fields to an existing resource
    fn update(&self, type_name: &str, id: &str, fields: &Fields)
    -> std::result::Result<(), ApiError>;

    /// Delete a resource
    fn delete(&self, type_name: &str, id: &str) -> std::result::Result<(), ApiError>;
}

/// A node of the [`ActualState`] forest
#[derive(Debug, Clone)]
pub struct ActualNode {
    pub type_name: String,
    pub resource: FetchedResource,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl ActualNode {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.type_name, &self.resource.name)
    }
}

/// Deployed resources assembled from one fetch pass
///
/// Nodes are addressed by their index in fetch order. When the remote reports
/// more than one resource with the same identity, the first is the one
/// [`find`](Self::find) returns; the others stay in the forest unmatched, so
/// they are planned for deletion like any undeclared resource.
#[derive(Debug, Clone, Default)]
pub struct ActualState {
    nodes: Vec<ActualNode>,
    roots: Vec<usize>,
    index: HashMap<ResourceKey, usize>,
}

impl ActualState {
    /// Fetch every registered type in dependency order
    ///
    /// Any fetch error aborts the pass; deployed state is never reconciled
    /// from a partial view.
    pub fn fetch(registry: &TypeRegistry, fetcher: &dyn StateFetcher) -> Result<Self> {
        let mut state = Self::default();

        for schema in registry.iter() {
            let type_name = schema.type_name.as_str();
            let parents: Vec<Option<usize>> = match &schema.parent_type {
                None => vec![None],
                Some(parent_type) => state
                    .of_type(parent_type)
                    .into_iter()
                    .map(Some)
                    .collect(),
            };

            for parent in parents {
                let parent_id = parent.map(|p| state.nodes[p].resource.id.clone());
                let fetched = fetcher
                    .fetch(type_name, parent_id.as_deref())
                    .map_err(|source| Error::Fetch {
                        type_name: type_name.to_string(),
                        source,
                    })?;
                log::debug!(
                    "Fetched {} {} resource(s){}",
                    fetched.len(),
                    type_name,
                    parent_id
                        .as_deref()
                        .map(|id| format!(" under {id}"))
                        .unwrap_or_default()
                );
                for resource in fetched {
                    state.insert(type_name, resource, parent);
                }
            }
        }

        Ok(state)
    }

    fn insert(&mut self, type_name: &str, resource: FetchedResource, parent: Option<usize>) {
        let key = ResourceKey::new(type_name, &resource.name);
        let idx = self.nodes.len();
        match self.index.get(&key) {
            Some(&existing) => log::warn!(
                "Deployed state has more than one {key}; matching id {} and treating id {} as undeclared",
                self.nodes[existing].resource.id,
                resource.id
            ),
            None => {
                self.index.insert(key, idx);
            }
        }

        self.nodes.push(ActualNode {
            type_name: type_name.to_string(),
            resource,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
    }

    /// Top-level deployed resources, in fetch order
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Find a deployed resource by identity
    pub fn find(&self, key: &ResourceKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn get(&self, idx: usize) -> Option<&ActualNode> {
        self.nodes.get(idx)
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.nodes.get(idx).and_then(|n| n.parent)
    }

    /// Deployed resources of a type, in fetch order
    pub fn of_type(&self, type_name: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.type_name == type_name)
            .map(|(i, _)| i)
            .collect()
    }

    /// All nodes, children before parents
    pub fn postorder(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.collect_postorder(root, &mut out);
        }
        out
    }

    /// A node and its descendants, children before parents
    pub fn subtree_postorder(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        if idx < self.nodes.len() {
            self.collect_postorder(idx, &mut out);
        }
        out
    }

    fn collect_postorder(&self, idx: usize, out: &mut Vec<usize>) {
        for &child in &self.nodes[idx].children {
            self.collect_postorder(child, out);
        }
        out.push(idx);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActualNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Serves canned responses keyed by (type, parent id) and records calls
    #[derive(Default)]
    struct Canned {
        responses: HashMap<(String, Option<String>), Vec<FetchedResource>>,
        failing: Option<String>,
        calls: RefCell<Vec<(String, Option<String>)>>,
    }

    impl Canned {
        fn with(mut self, type_name: &str, parent: Option<&str>, items: &[(&str, &str)]) -> Self {
            self.responses.insert(
                (type_name.to_string(), parent.map(String::from)),
                items
                    .iter()
                    .map(|(name, id)| FetchedResource::new(*name, *id))
                    .collect(),
            );
            self
        }
    }

    impl StateFetcher for Canned {
        fn fetch(
            &self,
            type_name: &str,
            parent_id: Option<&str>,
        ) -> std::result::Result<Vec<FetchedResource>, FetchError> {
            self.calls
                .borrow_mut()
                .push((type_name.to_string(), parent_id.map(String::from)));
            if self.failing.as_deref() == Some(type_name) {
                return Err(FetchError::new("connection reset"));
            }
            Ok(self
                .responses
                .get(&(type_name.to_string(), parent_id.map(String::from)))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn key(t: &str, n: &str) -> ResourceKey {
        ResourceKey::new(t, n)
    }

    #[test]
    fn test_fetch_walks_types_per_parent() {
        let fetcher = Canned::default()
            .with("Channel", None, &[("alerts", "c1"), ("pager", "c2")])
            .with("NotificationRule", Some("c1"), &[("r1", "n1")])
            .with("NotificationRule", Some("c2"), &[("r2", "n2")]);

        let state = ActualState::fetch(&TypeRegistry::standard(), &fetcher).unwrap();
        assert_eq!(state.len(), 4);

        let r2 = state.find(&key("NotificationRule", "r2")).unwrap();
        let pager = state.find(&key("Channel", "pager")).unwrap();
        assert_eq!(state.parent(r2), Some(pager));

        let calls = fetcher.calls.borrow();
        assert!(calls.contains(&("Credential".to_string(), None)));
        assert!(calls.contains(&("NotificationRule".to_string(), Some("c1".to_string()))));
        assert!(calls.contains(&("NotificationRule".to_string(), Some("c2".to_string()))));
        // No Credential deployed, so Source is never asked for
        assert!(!calls.iter().any(|(t, _)| t == "Source"));
    }

    #[test]
    fn test_postorder() {
        let fetcher = Canned::default()
            .with("Channel", None, &[("alerts", "c1")])
            .with("NotificationRule", Some("c1"), &[("r1", "n1"), ("r2", "n2")]);
        let state = ActualState::fetch(&TypeRegistry::standard(), &fetcher).unwrap();

        let names: Vec<&str> = state
            .postorder()
            .into_iter()
            .map(|i| state.get(i).unwrap().resource.name.as_str())
            .collect();
        assert_eq!(names, vec!["r1", "r2", "alerts"]);

        let alerts = state.find(&key("Channel", "alerts")).unwrap();
        assert_eq!(state.subtree_postorder(alerts).len(), 3);
    }

    #[test]
    fn test_duplicate_names_match_first() {
        let fetcher = Canned::default()
            .with("Channel", None, &[("alerts", "c1"), ("alerts", "c9")])
            .with("NotificationRule", Some("c9"), &[("r1", "n1")]);
        let state = ActualState::fetch(&TypeRegistry::standard(), &fetcher).unwrap();

        // The duplicate and its children are kept, only the first is findable
        assert_eq!(state.len(), 3);
        let idx = state.find(&key("Channel", "alerts")).unwrap();
        assert_eq!(state.get(idx).unwrap().resource.id, "c1");
        assert_eq!(state.postorder().len(), 3);
    }

    #[test]
    fn test_secret_changed_defaults_to_unchanged() {
        let fetcher = Canned::default();
        let secrets = Fields::from([("secret".to_string(), "hunter2".into())]);
        assert!(!fetcher.secret_changed("Credential", "cred-1", &secrets).unwrap());
    }

    #[test]
    fn test_fetch_error_aborts() {
        let fetcher = Canned {
            failing: Some("Channel".to_string()),
            ..Canned::default()
        };
        let err = ActualState::fetch(&TypeRegistry::standard(), &fetcher).unwrap_err();
        assert!(matches!(err, Error::Fetch { ref type_name, .. } if type_name == "Channel"));
    }

    #[test]
    fn test_merged_fields() {
        let mut fetched = FetchedResource::new("alerts", "c1");
        fetched
            .immutable_fields
            .insert("kind".to_string(), "webhook".into());
        fetched
            .mutable_fields
            .insert("webhook_url".to_string(), "https://a".into());

        let fields = fetched.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["kind"], "webhook");
    }

    #[test]
    fn test_namespace_ownership() {
        let mut fetched = FetchedResource::new("alerts", "c1");
        assert!(fetched.owned_by(None));
        assert!(fetched.owned_by(Some("team-a")));

        fetched.namespace = Some("team-a".to_string());
        assert!(fetched.owned_by(None));
        assert!(fetched.owned_by(Some("team-a")));
        assert!(!fetched.owned_by(Some("team-b")));
    }
}
