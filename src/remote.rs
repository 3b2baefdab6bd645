//! File-backed remote
//!
//! Deployed state lives in a JSON file. Every run loads it, reconciles
//! against it in memory, and writes it back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::{
    ApiError, FetchError, FetchedResource, Fields, InMemoryRemote, RemoteApi, RemoteStore,
    StateFetcher, TypeRegistry,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// On-disk layout of the state file
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    store: RemoteStore,
}

/// Remote system persisted to a JSON file
pub struct FileRemote {
    path: PathBuf,
    last_updated: Option<DateTime<Utc>>,
    remote: InMemoryRemote,
}

impl FileRemote {
    /// Open the state file; a missing file is an empty remote
    pub fn open(path: &Path, registry: Arc<TypeRegistry>, namespace: Option<&str>) -> Result<Self> {
        let state = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Could not read {}", path.display()))?;
            serde_json::from_str::<StateFile>(&content)
                .with_context(|| format!("Invalid state file {}", path.display()))?
        } else {
            log::debug!("No state file at {}, starting empty", path.display());
            StateFile::default()
        };

        let mut remote = InMemoryRemote::from_store(registry, state.store);
        if let Some(namespace) = namespace {
            remote = remote.with_namespace(namespace);
        }

        Ok(Self {
            path: path.to_path_buf(),
            last_updated: state.last_updated,
            remote,
        })
    }

    /// Write deployed state back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let state = StateFile {
            last_updated: Some(Utc::now()),
            store: self.remote.store(),
        };
        let content = serde_json::to_string_pretty(&state)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Could not write {}", self.path.display()))?;
        log::debug!("Saved {} record(s) to {}", state.store.records.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the state file was last written, if ever
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }
}

impl StateFetcher for FileRemote {
    fn fetch(
        &self,
        type_name: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<FetchedResource>, FetchError> {
        self.remote.fetch(type_name, parent_id)
    }

    fn secret_changed(
        &self,
        type_name: &str,
        id: &str,
        secrets: &Fields,
    ) -> Result<bool, FetchError> {
        self.remote.secret_changed(type_name, id, secrets)
    }
}

impl RemoteApi for FileRemote {
    fn create(
        &self,
        type_name: &str,
        name: &str,
        parent_id: Option<&str>,
        fields: &Fields,
    ) -> Result<String, ApiError> {
        self.remote.create(type_name, name, parent_id, fields)
    }

    fn update(&self, type_name: &str, id: &str, fields: &Fields) -> Result<(), ApiError> {
        self.remote.update(type_name, id, fields)
    }

    fn delete(&self, type_name: &str, id: &str) -> Result<(), ApiError> {
        self.remote.delete(type_name, id)
    }
}
