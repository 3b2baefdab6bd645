//! Generate a manifest from deployed state

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{ActualState, StateFetcher, TypeRegistry};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::cli::ImportArgs;
use crate::config::{Manifest, RemoteConfig, ResourceDecl};
use crate::paths;
use crate::remote::FileRemote;
use crate::ui;

/// Written in place of secret values, which are never read back
pub const SECRET_PLACEHOLDER: &str = "UNSET";

pub fn run(ctx: &Context, args: &ImportArgs) -> Result<()> {
    let registry = Arc::new(TypeRegistry::standard());
    let state_file = match &args.state_file {
        Some(path) => path.clone(),
        None => paths::default_state_file()?,
    };
    let remote = FileRemote::open(&state_file, Arc::clone(&registry), args.namespace.as_deref())?;

    let manifest = import(&registry, &remote, &state_file, args.namespace.as_deref())?;
    let content = toml::to_string_pretty(&manifest).context("Could not serialize manifest")?;

    match &args.output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Could not write {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Imported {} resource(s) into {}",
                    manifest.resource_count(),
                    path.display()
                ));
                ui::dim(&format!("Secret fields are set to {SECRET_PLACEHOLDER}"));
            }
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// Manifest declaring every deployed resource `namespace` owns
///
/// Required secret fields get [`SECRET_PLACEHOLDER`]; optional ones are
/// left out since deployed state does not say whether they are set.
pub fn import(
    registry: &TypeRegistry,
    fetcher: &dyn StateFetcher,
    state_file: &Path,
    namespace: Option<&str>,
) -> Result<Manifest> {
    let actual = ActualState::fetch(registry, fetcher).context("Could not fetch deployed state")?;
    let resources = actual
        .roots()
        .iter()
        .filter_map(|&idx| declare(registry, &actual, idx, namespace))
        .collect();

    Ok(Manifest {
        namespace: namespace.map(String::from),
        remote: RemoteConfig {
            state_file: Some(state_file.display().to_string()),
        },
        resources,
    })
}

fn declare(
    registry: &TypeRegistry,
    actual: &ActualState,
    idx: usize,
    namespace: Option<&str>,
) -> Option<ResourceDecl> {
    let node = actual.get(idx)?;
    let key = node.key();
    if !node.resource.owned_by(namespace) {
        log::debug!("Not importing {key}; it belongs to another namespace");
        return None;
    }
    if actual.find(&key) != Some(idx) {
        log::warn!("Not importing duplicate {key} (id {})", node.resource.id);
        return None;
    }

    let mut fields = node.resource.fields();
    if let Some(schema) = registry.get(&node.type_name) {
        for field in schema.fields.iter().filter(|f| f.secret && f.required) {
            fields.insert(field.name.clone(), Value::from(SECRET_PLACEHOLDER));
        }
    }

    Some(ResourceDecl {
        type_name: node.type_name.clone(),
        name: node.resource.name.clone(),
        fields,
        children: node
            .children
            .iter()
            .filter_map(|&child| declare(registry, actual, child, namespace))
            .collect(),
    })
}
