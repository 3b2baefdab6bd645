use anyhow::Result;
use std::path::Path;

use super::Workspace;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, manifest: Option<&Path>) -> Result<()> {
    let workspace = Workspace::load(manifest)?;
    workspace.graph.validate()?;

    if !ctx.quiet {
        ui::kv("Manifest", &workspace.manifest_path.display().to_string());
        ui::kv("Resources", &workspace.manifest.resource_count().to_string());
        if let Some(namespace) = &workspace.manifest.namespace {
            ui::kv("Namespace", namespace);
        }
    }
    ui::success("Manifest is valid");
    Ok(())
}
