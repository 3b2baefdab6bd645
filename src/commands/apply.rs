use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{
    ApplyOutcome, ApplyReport, ApplyResult, ChangePlan, ConfirmCallback, Operation,
    ProgressCallback,
};
use std::path::Path;

use super::Workspace;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::ui;

pub fn run(ctx: &Context, manifest: Option<&Path>, args: &ApplyArgs) -> Result<()> {
    let mut workspace = Workspace::load(manifest)?;
    let remote = workspace.open_remote()?;
    let options = workspace.options();

    let mut progress = TerminalProgress::new(ctx.quiet);
    let mut confirm = TerminalConfirm {
        yes: args.yes,
        show_secrets: args.show_secrets,
        show_deps: ctx.verbose > 0,
        quiet: ctx.quiet,
    };

    let report = reconcile::reconcile_with(
        &mut workspace.graph,
        &remote,
        &remote,
        &options,
        &mut progress,
        &mut confirm,
    )
    .context("Could not reconcile")?;

    if report.results.is_empty() {
        ui::success("Deployed state matches the manifest");
        return Ok(());
    }

    let summary = report.summary();
    if summary.total_changes() > 0 {
        remote.save()?;
    }
    print_report(&report);

    if summary.failed > 0 {
        bail!("{} operation(s) failed", summary.failed);
    }
    Ok(())
}

/// Progress bar over the operations of a plan
struct TerminalProgress {
    quiet: bool,
    pb: Option<ProgressBar>,
}

impl TerminalProgress {
    fn new(quiet: bool) -> Self {
        Self { quiet, pb: None }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_plan_start(&mut self, count: usize) {
        if self.quiet {
            return;
        }
        let pb = ProgressBar::new(count as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        pb.set_style(style);
        self.pb = Some(pb);
    }

    fn on_operation_start(&mut self, _index: usize, operation: &Operation) {
        if let Some(pb) = &self.pb {
            pb.set_message(operation.to_string());
        }
    }

    fn on_operation_complete(&mut self, result: &ApplyResult) {
        let Some(pb) = &self.pb else {
            return;
        };
        if let ApplyOutcome::Failed { error } = &result.outcome {
            pb.println(format!("  {} {} {}: {}", "✗".red(), result.kind, result.key, error));
        }
        pb.inc(1);
    }

    fn on_plan_complete(&mut self, _report: &ApplyReport) {
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
    }
}

/// Shows the plan and asks before applying it
struct TerminalConfirm {
    yes: bool,
    show_secrets: bool,
    show_deps: bool,
    quiet: bool,
}

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, plan: &ChangePlan) -> bool {
        if !self.quiet {
            ui::header("Plan");
            ui::print_plan(plan, self.show_secrets, self.show_deps);
            println!();
        }
        if self.yes {
            return true;
        }

        match Confirm::new()
            .with_prompt("Apply these changes?")
            .default(false)
            .interact()
        {
            Ok(confirmed) => confirmed,
            Err(e) => {
                log::warn!("Could not read confirmation: {e}");
                false
            }
        }
    }
}

fn print_report(report: &ApplyReport) {
    let summary = report.summary();
    println!();
    if report.is_success() {
        ui::success("Manifest applied");
    } else if report.cancelled {
        ui::warn("Apply cancelled");
    } else if summary.failed == 0 {
        ui::warn("Nothing applied");
    } else {
        ui::warn("Manifest applied with errors");
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }

    for failure in report.failures() {
        if let ApplyOutcome::Failed { error } = &failure.outcome {
            ui::error(&format!("{} {}: {}", failure.kind, failure.key, error));
            ui::dim(error.category().advice());
        }
    }
}
