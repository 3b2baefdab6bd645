//! In-memory remote system
//!
//! [`InMemoryRemote`] implements both [`StateFetcher`] and [`RemoteApi`] over
//! a plain [`RemoteStore`]. It enforces the same rules a real backend does:
//!
//! - names are unique per type (409 on a second create)
//! - a child needs a live parent of the right type (404 otherwise)
//! - a resource with live children cannot be deleted (409)
//! - immutable fields cannot be updated (400)
//! - unknown ids are 404
//! - secret values are stored but never listed
//!
//! Failures can be injected per operation for tests, and every call is
//! recorded.

use crate::error::{ApiError, FetchError};
use crate::graph::ResourceGraph;
use crate::plan::OperationKind;
use crate::resource::{Fields, ResourceKey};
use crate::schema::TypeRegistry;
use crate::state::{FetchedResource, RemoteApi, StateFetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A deployed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub type_name: String,
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl RemoteRecord {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.type_name, &self.name)
    }
}

/// Everything deployed, in creation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteStore {
    /// Last id handed out
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
}

impl RemoteStore {
    fn allocate_id(&mut self, type_name: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", type_name.to_ascii_lowercase(), self.next_id)
    }

    fn position(&self, type_name: &str, id: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.id == id && r.type_name == type_name)
    }

    pub fn find(&self, type_name: &str, name: &str) -> Option<&RemoteRecord> {
        self.records
            .iter()
            .find(|r| r.type_name == type_name && r.name == name)
    }

    fn has_children(&self, id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.parent_id.as_deref() == Some(id))
    }
}

#[derive(Debug, Default)]
struct Inner {
    store: RemoteStore,
    failures: HashMap<(OperationKind, ResourceKey), ApiError>,
    fetch_failures: HashSet<String>,
    calls: Vec<String>,
}

/// Remote system held in memory
#[derive(Debug)]
pub struct InMemoryRemote {
    registry: Arc<TypeRegistry>,
    namespace: Option<String>,
    inner: Mutex<Inner>,
}

impl InMemoryRemote {
    /// Create an empty remote that accepts the types of `registry`
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self::from_store(registry, RemoteStore::default())
    }

    /// Create a remote over existing records
    pub fn from_store(registry: Arc<TypeRegistry>, store: RemoteStore) -> Self {
        Self {
            registry,
            namespace: None,
            inner: Mutex::new(Inner {
                store,
                ..Inner::default()
            }),
        }
    }

    /// Create a remote where every resource of `graph` is already deployed
    pub fn from_graph(graph: &ResourceGraph) -> Self {
        let remote = Self::new(graph.registry_arc());
        let mut ids = HashMap::new();
        for node in graph.walk_preorder() {
            let Some(resource) = graph.get(node) else {
                continue;
            };
            let parent_id = graph
                .parent(node)
                .and_then(|p| ids.get(&p))
                .map(String::as_str);
            let id = remote.seed(
                resource.type_name(),
                resource.name(),
                parent_id,
                resource.fields().clone(),
            );
            ids.insert(node, id);
        }
        remote
    }

    /// Stamp created resources with a namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a record directly, bypassing validation and call recording
    pub fn seed(
        &self,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: Fields,
    ) -> String {
        self.insert(self.namespace.clone(), type_name, name, parent_id, fields)
    }

    /// [`seed`](Self::seed) a record owned by another namespace
    pub fn seed_in_namespace(
        &self,
        namespace: &str,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: Fields,
    ) -> String {
        self.insert(Some(namespace.to_string()), type_name, name, parent_id, fields)
    }

    fn insert(
        &self,
        namespace: Option<String>,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: Fields,
    ) -> String {
        let mut inner = self.lock();
        let id = inner.store.allocate_id(type_name);
        inner.store.records.push(RemoteRecord {
            type_name: type_name.to_string(),
            name: name.to_string(),
            id: id.clone(),
            parent_id: parent_id.map(String::from),
            namespace,
            fields,
        });
        id
    }

    /// Fail the next `kind` call on `key` with `error`
    pub fn fail_on(&self, kind: OperationKind, key: ResourceKey, error: ApiError) {
        self.lock().failures.insert((kind, key), error);
    }

    /// Fail every fetch of `type_name`
    pub fn fail_fetch(&self, type_name: &str) {
        self.lock().fetch_failures.insert(type_name.to_string());
    }

    /// Calls made so far, e.g. `create Channel.alerts`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Look up a deployed resource by identity
    pub fn record(&self, type_name: &str, name: &str) -> Option<RemoteRecord> {
        self.lock().store.find(type_name, name).cloned()
    }

    /// Snapshot of everything deployed
    pub fn store(&self) -> RemoteStore {
        self.lock().store.clone()
    }

    pub fn into_store(self) -> RemoteStore {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .store
    }

    pub fn len(&self) -> usize {
        self.lock().store.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listed fields as (mutable, immutable), secrets left out
    fn split_fields(&self, type_name: &str, fields: &Fields) -> (Fields, Fields) {
        let schema = self.registry.get(type_name);
        fields
            .iter()
            .filter(|(k, _)| !schema.is_some_and(|s| s.is_secret(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| !schema.is_some_and(|s| s.is_immutable(k)))
    }
}

fn injected(inner: &mut Inner, kind: OperationKind, key: &ResourceKey) -> Result<(), ApiError> {
    match inner.failures.remove(&(kind, key.clone())) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

impl StateFetcher for InMemoryRemote {
    fn fetch(
        &self,
        type_name: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<FetchedResource>, FetchError> {
        let mut inner = self.lock();
        inner.calls.push(match parent_id {
            Some(parent) => format!("fetch {type_name} under {parent}"),
            None => format!("fetch {type_name}"),
        });
        if inner.fetch_failures.contains(type_name) {
            return Err(FetchError::new(format!("{type_name} listing unavailable")));
        }

        Ok(inner
            .store
            .records
            .iter()
            .filter(|r| r.type_name == type_name && r.parent_id.as_deref() == parent_id)
            .map(|r| {
                let (mutable_fields, immutable_fields) = self.split_fields(type_name, &r.fields);
                FetchedResource {
                    name: r.name.clone(),
                    id: r.id.clone(),
                    namespace: r.namespace.clone(),
                    mutable_fields,
                    immutable_fields,
                }
            })
            .collect())
    }

    fn secret_changed(
        &self,
        type_name: &str,
        id: &str,
        secrets: &Fields,
    ) -> Result<bool, FetchError> {
        let inner = self.lock();
        let Some(pos) = inner.store.position(type_name, id) else {
            return Err(FetchError::new(format!("{type_name} {id} does not exist")));
        };
        let deployed = &inner.store.records[pos].fields;
        Ok(secrets
            .iter()
            .any(|(field, value)| deployed.get(field).unwrap_or(&Value::Null) != value))
    }
}

impl RemoteApi for InMemoryRemote {
    fn create(
        &self,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: &Fields,
    ) -> Result<String, ApiError> {
        let key = ResourceKey::new(type_name, name);
        let mut inner = self.lock();
        inner.calls.push(format!("create {key}"));
        injected(&mut inner, OperationKind::Create, &key)?;

        let schema = self
            .registry
            .get(type_name)
            .ok_or_else(|| ApiError::new(400, format!("unknown type '{type_name}'")))?;
        if inner.store.find(type_name, name).is_some() {
            return Err(ApiError::conflict(format!("{key} already exists")));
        }
        match (&schema.parent_type, parent_id) {
            (None, None) => {}
            (Some(parent_type), Some(parent_id)) => {
                if inner.store.position(parent_type, parent_id).is_none() {
                    return Err(ApiError::not_found(format!(
                        "parent {parent_type} {parent_id} does not exist"
                    )));
                }
            }
            (Some(parent_type), None) => {
                return Err(ApiError::new(400, format!("{key} needs a {parent_type} parent")));
            }
            (None, Some(_)) => {
                return Err(ApiError::new(400, format!("{key} cannot have a parent")));
            }
        }

        let id = inner.store.allocate_id(type_name);
        inner.store.records.push(RemoteRecord {
            type_name: type_name.to_string(),
            name: name.to_string(),
            id: id.clone(),
            parent_id: parent_id.map(String::from),
            namespace: self.namespace.clone(),
            fields: fields.clone(),
        });
        Ok(id)
    }

    fn update(&self, type_name: &str, id: &str, fields: &Fields) -> Result<(), ApiError> {
        let mut inner = self.lock();
        let Some(pos) = inner.store.position(type_name, id) else {
            inner.calls.push(format!("update {type_name}#{id}"));
            return Err(ApiError::not_found(format!("{type_name} {id} does not exist")));
        };
        let key = inner.store.records[pos].key();
        inner.calls.push(format!("update {key}"));
        injected(&mut inner, OperationKind::Update, &key)?;

        if let Some(field) = fields
            .keys()
            .find(|f| self.registry.get(type_name).is_some_and(|s| s.is_immutable(f)))
        {
            return Err(ApiError::new(
                400,
                format!("field '{field}' of {key} is immutable"),
            ));
        }

        let record = &mut inner.store.records[pos];
        for (field, value) in fields {
            if value == &Value::Null {
                record.fields.remove(field);
            } else {
                record.fields.insert(field.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn delete(&self, type_name: &str, id: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        let Some(pos) = inner.store.position(type_name, id) else {
            inner.calls.push(format!("delete {type_name}#{id}"));
            return Err(ApiError::not_found(format!("{type_name} {id} does not exist")));
        };
        let key = inner.store.records[pos].key();
        inner.calls.push(format!("delete {key}"));
        injected(&mut inner, OperationKind::Delete, &key)?;

        if inner.store.has_children(id) {
            return Err(ApiError::conflict(format!("{key} still has children")));
        }
        inner.store.records.remove(pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;
    use serde_json::json;

    fn remote() -> InMemoryRemote {
        InMemoryRemote::new(Arc::new(TypeRegistry::standard()))
    }

    fn channel_fields() -> Fields {
        Fields::from([
            ("kind".to_string(), json!("webhook")),
            ("webhook_url".to_string(), json!("https://a")),
        ])
    }

    #[test]
    fn test_create_rules() {
        let remote = remote();
        let id = remote
            .create("Channel", "alerts", None, &channel_fields())
            .unwrap();

        let dup = remote
            .create("Channel", "alerts", None, &channel_fields())
            .unwrap_err();
        assert_eq!(dup.status, 409);

        let orphan = remote
            .create("NotificationRule", "r1", Some("channel-99"), &Fields::new())
            .unwrap_err();
        assert!(orphan.is_not_found());

        let rootless = remote
            .create("NotificationRule", "r1", None, &Fields::new())
            .unwrap_err();
        assert_eq!(rootless.status, 400);

        assert!(
            remote
                .create("NotificationRule", "r1", Some(&id), &Fields::new())
                .is_ok()
        );
    }

    #[test]
    fn test_update_rejects_immutable_fields() {
        let remote = remote();
        let id = remote.seed("Channel", "alerts", None, channel_fields());

        let err = remote
            .update("Channel", &id, &Fields::from([("kind".to_string(), json!("slack"))]))
            .unwrap_err();
        assert_eq!(err.status, 400);

        remote
            .update(
                "Channel",
                &id,
                &Fields::from([("webhook_url".to_string(), json!("https://b"))]),
            )
            .unwrap();
        let record = remote.record("Channel", "alerts").unwrap();
        assert_eq!(record.fields["webhook_url"], json!("https://b"));

        assert!(
            remote
                .update("Channel", "nope", &Fields::new())
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_delete_requires_no_children() {
        let remote = remote();
        let id = remote.seed("Channel", "alerts", None, channel_fields());
        let rule = remote.seed("NotificationRule", "r1", Some(&id), Fields::new());

        assert_eq!(remote.delete("Channel", &id).unwrap_err().status, 409);
        remote.delete("NotificationRule", &rule).unwrap();
        remote.delete("Channel", &id).unwrap();
        assert!(remote.is_empty());
        assert!(remote.delete("Channel", &id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_fetch_splits_fields_by_schema() {
        let remote = remote().with_namespace("team-a");
        let id = remote.seed("Channel", "alerts", None, channel_fields());
        remote.seed("NotificationRule", "r1", Some(&id), Fields::new());

        let channels = remote.fetch("Channel", None).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].namespace.as_deref(), Some("team-a"));
        assert!(channels[0].immutable_fields.contains_key("kind"));
        assert!(channels[0].mutable_fields.contains_key("webhook_url"));

        assert_eq!(remote.fetch("NotificationRule", Some(&id)).unwrap().len(), 1);
        assert!(remote.fetch("NotificationRule", None).unwrap().is_empty());
    }

    #[test]
    fn test_secrets_are_not_listed() {
        let remote = remote();
        let mut fields = channel_fields();
        fields.insert("auth_header".to_string(), json!("Bearer abc"));
        let id = remote.seed("Channel", "alerts", None, fields);

        let listed = remote.fetch("Channel", None).unwrap();
        assert!(!listed[0].fields().contains_key("auth_header"));

        let same = Fields::from([("auth_header".to_string(), json!("Bearer abc"))]);
        let rotated = Fields::from([("auth_header".to_string(), json!("Bearer xyz"))]);
        assert!(!remote.secret_changed("Channel", &id, &same).unwrap());
        assert!(remote.secret_changed("Channel", &id, &rotated).unwrap());
        assert!(remote.secret_changed("Channel", "nope", &same).is_err());
    }

    #[test]
    fn test_injected_failures_fire_once() {
        let remote = remote();
        let key = ResourceKey::new("Channel", "alerts");
        remote.fail_on(OperationKind::Create, key, ApiError::new(503, "busy"));

        assert_eq!(
            remote
                .create("Channel", "alerts", None, &channel_fields())
                .unwrap_err()
                .status,
            503
        );
        assert!(
            remote
                .create("Channel", "alerts", None, &channel_fields())
                .is_ok()
        );

        remote.fail_fetch("Channel");
        assert!(remote.fetch("Channel", None).is_err());
        assert_eq!(
            remote.calls(),
            vec!["create Channel.alerts", "create Channel.alerts", "fetch Channel"]
        );
    }

    #[test]
    fn test_from_graph_links_parents() {
        let mut graph = ResourceGraph::with_standard_types();
        let alerts = graph
            .add_root(Resource::new("Channel", "alerts").with_fields(channel_fields()))
            .unwrap();
        graph
            .register_child(alerts, Resource::new("NotificationRule", "r1"))
            .unwrap();

        let remote = InMemoryRemote::from_graph(&graph);
        let channel = remote.record("Channel", "alerts").unwrap();
        let rule = remote.record("NotificationRule", "r1").unwrap();
        assert_eq!(rule.parent_id, Some(channel.id));
        assert!(remote.calls().is_empty());

        let store = remote.into_store();
        assert_eq!(store.next_id, 2);
        assert_eq!(store.records.len(), 2);
    }
}
