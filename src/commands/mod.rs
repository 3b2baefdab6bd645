pub mod apply;
pub mod import;
pub mod plan;
pub mod types;
pub mod validate;

use anyhow::Result;
use reconcile::{ResourceGraph, TypeRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Manifest;
use crate::paths;
use crate::remote::FileRemote;

/// A loaded manifest and the graph it declares
pub struct Workspace {
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
    pub graph: ResourceGraph,
}

impl Workspace {
    /// Load the manifest given on the command line, or the default one
    pub fn load(manifest: Option<&Path>) -> Result<Self> {
        let manifest_path = match manifest {
            Some(path) => path.to_path_buf(),
            None => paths::default_manifest()?,
        };
        log::debug!("Loading manifest {}", manifest_path.display());

        let manifest = Manifest::load(&manifest_path)?;
        let graph = manifest.build_graph(Arc::new(TypeRegistry::standard()))?;
        Ok(Self {
            manifest_path,
            manifest,
            graph,
        })
    }

    /// Open the remote state file the manifest points at
    pub fn open_remote(&self) -> Result<FileRemote> {
        let path = self.manifest.state_file(&self.manifest_path)?;
        FileRemote::open(
            &path,
            self.graph.registry_arc(),
            self.manifest.namespace.as_deref(),
        )
    }

    pub fn options(&self) -> reconcile::ReconcileOptions {
        let options = reconcile::ReconcileOptions::default();
        match &self.manifest.namespace {
            Some(namespace) => options.with_namespace(namespace),
            None => options,
        }
    }
}
