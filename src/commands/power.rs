//! `hatchery start` / `stop` / `restart` - power operations only.
//!
//! These walk no configuration stages: start brings the targets (and their
//! dependencies) up in plan order; stop shuts the same set down in reverse,
//! dependents before the guests they depend on.

use crate::adapter::PctAdapter;
use crate::cli::PowerArgs;
use crate::commands::{load_fleet, Fleet};
use colored::Colorize;
use convergent::{power_off, power_on, ExecutionPlan, GuestId, PipelineOptions};
use std::path::Path;
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, Copy)]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
}

pub fn run(action: PowerAction, args: &PowerArgs, catalog_path: &Path) -> anyhow::Result<bool> {
    let fleet = load_fleet(catalog_path)?;
    let plan = fleet.plan_for(&args.ids)?;
    let adapter = PctAdapter::new();
    let opts = PipelineOptions::default();
    let cancel = AtomicBool::new(false);

    let ok = match action {
        PowerAction::Start => start_all(&adapter, &fleet, &plan, &opts, &cancel),
        PowerAction::Stop => stop_all(&adapter, &fleet, &plan, &opts, &cancel),
        PowerAction::Restart => {
            stop_all(&adapter, &fleet, &plan, &opts, &cancel)
                && start_all(&adapter, &fleet, &plan, &opts, &cancel)
        }
    };
    Ok(ok)
}

fn start_all(
    adapter: &PctAdapter,
    fleet: &Fleet,
    plan: &ExecutionPlan,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> bool {
    let mut ok = true;
    for &id in plan.order() {
        ok &= start_one(adapter, fleet, id, opts, cancel);
    }
    ok
}

fn stop_all(
    adapter: &PctAdapter,
    fleet: &Fleet,
    plan: &ExecutionPlan,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> bool {
    let mut ok = true;
    for id in plan.reversed() {
        let Some(spec) = fleet.catalog.resolved_spec(id) else {
            continue;
        };
        match power_off(adapter, &spec, &opts.retry, cancel) {
            Ok(true) => println!("{id} {}", "stopped".green()),
            Ok(false) => println!("{id} {}", "already stopped".dimmed()),
            Err(e) => {
                eprintln!("{id} {}: {e}", "stop failed".red());
                ok = false;
            }
        }
    }
    ok
}

fn start_one(
    adapter: &PctAdapter,
    fleet: &Fleet,
    id: GuestId,
    opts: &PipelineOptions,
    cancel: &AtomicBool,
) -> bool {
    let Some(spec) = fleet.catalog.resolved_spec(id) else {
        return true;
    };
    match power_on(adapter, &spec, opts, cancel) {
        Ok(true) => {
            println!("{id} {}", "started".green());
            true
        }
        Ok(false) => {
            println!("{id} {}", "already running".dimmed());
            true
        }
        Err(e) => {
            eprintln!("{id} {}: {e}", "start failed".red());
            false
        }
    }
}
