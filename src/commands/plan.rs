use anyhow::{Context as AnyhowContext, Result};
use std::path::Path;

use super::Workspace;
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

pub fn run(ctx: &Context, manifest: Option<&Path>, args: &PlanArgs) -> Result<()> {
    let mut workspace = Workspace::load(manifest)?;
    let remote = workspace.open_remote()?;
    let options = workspace.options();

    let plan = reconcile::plan(&mut workspace.graph, &remote, &options)
        .context("Could not compute plan")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    if !ctx.quiet {
        ui::header("Plan");
        ui::kv("Manifest", &workspace.manifest_path.display().to_string());
        ui::kv("Remote", &remote.path().display().to_string());
        ui::kv("Deployed", &format!("{} resource(s)", remote.len()));
        if let Some(updated) = remote.last_updated() {
            ui::kv("Last applied", &updated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        }
        println!();
    }

    if plan.is_empty() {
        ui::success("Deployed state matches the manifest");
        return Ok(());
    }
    ui::print_plan(&plan, args.show_secrets, ctx.verbose > 0);
    Ok(())
}
