use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge deployed resources to a declared manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Manifest file [default: <config dir>/converge.toml]
    #[arg(short, long, global = true, env = "CONVERGE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Make deployed state match the manifest
    Apply(ApplyArgs),

    /// List the resource types a manifest may declare
    Types,

    /// Check the manifest without contacting the remote
    Validate,

    /// Write a manifest declaring what is deployed
    Import(ImportArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Show secret field values instead of REDACTED
    #[arg(long)]
    pub show_secrets: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Show secret field values instead of REDACTED
    #[arg(long)]
    pub show_secrets: bool,
}

#[derive(Parser)]
pub struct ImportArgs {
    /// Remote state file [default: <state dir>/remote.json]
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Only import resources owned by this namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Write the manifest here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
