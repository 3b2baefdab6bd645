//! Manifest loading
//!
//! A manifest declares one reconciliation unit:
//!
//! ```toml
//! namespace = "team-a"
//!
//! [remote]
//! state_file = "~/.local/state/converge/remote.json"
//!
//! [[resources]]
//! type = "Channel"
//! name = "alerts"
//! fields = { kind = "webhook", webhook_url = "https://hooks.example.com" }
//!
//! [[resources.children]]
//! type = "NotificationRule"
//! name = "oncall"
//! ```

use anyhow::{Context, Result};
use reconcile::{Fields, NodeId, Resource, ResourceGraph, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::paths;

/// Parsed manifest file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Ownership scope; deployed resources outside it are never deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// JSON file holding deployed state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,
}

/// A declared resource and its children
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Fields::is_empty")]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResourceDecl>,
}

impl Manifest {
    /// Load a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build the declared graph over `registry`
    pub fn build_graph(&self, registry: Arc<TypeRegistry>) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new(registry);
        for decl in &self.resources {
            let resource = decl.to_resource();
            let node = graph
                .add_root(resource)
                .with_context(|| format!("Cannot declare {}.{}", decl.type_name, decl.name))?;
            add_children(&mut graph, node, &decl.children)?;
        }
        log::debug!("Manifest declares {} resource(s)", graph.len());
        Ok(graph)
    }

    /// Remote state file, resolved relative to the manifest's directory
    pub fn state_file(&self, manifest_path: &Path) -> Result<PathBuf> {
        match &self.remote.state_file {
            Some(file) => {
                let path = paths::expand(file);
                if path.is_relative() {
                    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
                    Ok(base.join(path))
                } else {
                    Ok(path)
                }
            }
            None => paths::default_state_file(),
        }
    }

    /// Number of declared resources, children included
    pub fn resource_count(&self) -> usize {
        fn count(decls: &[ResourceDecl]) -> usize {
            decls.iter().map(|d| 1 + count(&d.children)).sum()
        }
        count(&self.resources)
    }
}

impl ResourceDecl {
    fn to_resource(&self) -> Resource {
        Resource::new(&self.type_name, &self.name).with_fields(self.fields.clone())
    }
}

fn add_children(graph: &mut ResourceGraph, parent: NodeId, children: &[ResourceDecl]) -> Result<()> {
    for decl in children {
        let node = graph
            .register_child(parent, decl.to_resource())
            .with_context(|| format!("Cannot declare {}.{}", decl.type_name, decl.name))?;
        add_children(graph, node, &decl.children)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MANIFEST: &str = r#"
namespace = "team-a"

[remote]
state_file = "state/remote.json"

[[resources]]
type = "Channel"
name = "alerts"
fields = { kind = "webhook", webhook_url = "https://a" }

[[resources.children]]
type = "NotificationRule"
name = "oncall"
fields = { conditions = ["severity >= high"] }

[[resources]]
type = "Credential"
name = "warehouse"
fields = { kind = "postgres", secret = "hunter2" }

[[resources.children]]
type = "Source"
name = "orders"
fields = { kind = "postgres", table = "public.orders" }

[[resources.children.children]]
type = "Validator"
name = "row_count"

[resources.children.children.fields]
kind = "volume"
metric = "count"
threshold = { min = 100 }
"#;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry::standard())
    }

    #[test]
    fn test_parse_nested_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.namespace.as_deref(), Some("team-a"));
        assert_eq!(manifest.resource_count(), 5);

        let graph = manifest.build_graph(registry()).unwrap();
        assert_eq!(graph.len(), 5);

        let validator = graph.find("Validator", "row_count").unwrap();
        let source = graph.parent(validator).unwrap();
        assert_eq!(graph.get(source).unwrap().name(), "orders");
        assert_eq!(
            graph.get(validator).unwrap().field("threshold"),
            Some(&json!({"min": 100}))
        );
        let rule = graph.find("NotificationRule", "oncall").unwrap();
        assert_eq!(
            graph.get(rule).unwrap().field("conditions"),
            Some(&json!(["severity >= high"]))
        );
    }

    #[test]
    fn test_unknown_type_is_reported() {
        let manifest = Manifest::parse(
            r#"
[[resources]]
type = "Bucket"
name = "b"
"#,
        )
        .unwrap();
        let err = manifest.build_graph(registry()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown resource type 'Bucket'"));
    }

    #[test]
    fn test_child_under_wrong_parent_is_reported() {
        let manifest = Manifest::parse(
            r#"
[[resources]]
type = "Channel"
name = "alerts"
fields = { kind = "webhook", webhook_url = "https://a" }

[[resources.children]]
type = "Window"
name = "w"
fields = { kind = "tumbling" }
"#,
        )
        .unwrap();
        let err = manifest.build_graph(registry()).unwrap_err();
        assert!(format!("{err:#}").contains("Cannot declare Window.w"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Manifest::parse("namspace = \"typo\"").is_err());
    }

    #[test]
    fn test_state_file_is_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("converge.toml");
        fs::write(&manifest_path, MANIFEST).unwrap();

        let manifest = Manifest::load(&manifest_path).unwrap();
        assert_eq!(
            manifest.state_file(&manifest_path).unwrap(),
            dir.path().join("state").join("remote.json")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Could not read"));
    }
}
