use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hatchery")]
#[command(version)]
#[command(about = "Converge a declared fleet of containers and VMs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the guest catalog (JSON)
    #[arg(short, long, global = true, env = "HATCHERY_CATALOG")]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge guests (targets plus their dependency closure; all when none given)
    Converge(ConvergeArgs),

    /// Print the execution order without changing anything
    Plan(PlanArgs),

    /// Start guests in dependency order
    Start(PowerArgs),

    /// Stop guests in reverse dependency order
    Stop(PowerArgs),

    /// Restart guests in dependency order
    Restart(PowerArgs),

    /// Destroy the named guests (no dependency resolution)
    Delete(DeleteArgs),

    /// Show current vs desired state of guests (inspections only)
    Status(StatusArgs),
}

#[derive(clap::Args)]
pub struct ConvergeArgs {
    /// Guest ids to converge; empty means the whole catalog
    pub ids: Vec<u32>,

    /// Show what would change without applying anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Number of parallel workers for independent guests
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct PlanArgs {
    /// Guest ids to plan for; empty means the whole catalog
    pub ids: Vec<u32>,
}

#[derive(clap::Args)]
pub struct PowerArgs {
    /// Guest ids to operate on
    #[arg(required = true)]
    pub ids: Vec<u32>,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    /// Guest ids to destroy
    #[arg(required = true)]
    pub ids: Vec<u32>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct StatusArgs {
    /// Guest ids to report on; empty means the whole catalog
    pub ids: Vec<u32>,
}
