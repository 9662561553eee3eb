//! `hatchery converge` - run the full lifecycle pipeline over a plan.

use crate::adapter::PctAdapter;
use crate::cli::ConvergeArgs;
use crate::commands::{load_fleet, Fleet};
use crate::ui::{self, ConsoleProgress};
use colored::Colorize;
use convergent::{inspect_guest, ExecuteOptions, ExecutionPlan, PipelineOptions};
use std::path::Path;
use std::sync::atomic::AtomicBool;

pub fn run(args: &ConvergeArgs, catalog_path: &Path, quiet: bool) -> anyhow::Result<bool> {
    let fleet = load_fleet(catalog_path)?;
    if fleet.catalog.is_empty() {
        println!("catalog declares no guests");
        return Ok(true);
    }

    let plan = fleet.plan_for(&args.ids)?;
    let adapter = PctAdapter::new();

    if args.dry_run {
        return dry_run(&adapter, &fleet, &plan);
    }

    if !args.yes {
        let question = format!("Converge {} guest(s)?", plan.len());
        if !ui::confirm(&question)? {
            println!("aborted");
            return Ok(false);
        }
    }

    let opts = ExecuteOptions {
        jobs: args.jobs,
        pipeline: PipelineOptions::default(),
    };
    let cancel = AtomicBool::new(false);
    let mut progress = ConsoleProgress::new(quiet);
    let summary = convergent::execute(
        &adapter,
        &fleet.catalog,
        &fleet.graph,
        &plan,
        &opts,
        &cancel,
        &mut progress,
    );

    if !quiet {
        ui::print_summary(&summary);
    }
    Ok(summary.is_success())
}

/// Inspect everything in plan order, report divergences, apply nothing.
fn dry_run(adapter: &PctAdapter, fleet: &Fleet, plan: &ExecutionPlan) -> anyhow::Result<bool> {
    let mut pending_total = 0;
    for &id in plan.order() {
        let Some(spec) = fleet.catalog.resolved_spec(id) else {
            continue;
        };
        let states = inspect_guest(adapter, &spec)?;
        let pending: Vec<_> = states.iter().filter(|(_, s)| !s.is_matching()).collect();
        if pending.is_empty() {
            println!("{id} ({}): {}", spec.config.hostname, "up to date".green());
        } else {
            pending_total += pending.len();
            println!(
                "{id} ({}): {} aspect(s) would change",
                spec.config.hostname,
                pending.len()
            );
            for (aspect, state) in pending {
                println!("    {}", ui::render_aspect(*aspect, state));
            }
        }
    }
    if pending_total == 0 {
        println!("{}", "nothing to do".green());
    }
    Ok(true)
}
