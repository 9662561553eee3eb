//! `hatchery delete` - destroy the named guests.
//!
//! Deletion touches exactly the named ids, no dependency resolution; a guest
//! others depend on can still be deleted deliberately, the next converge will
//! simply recreate it.

use crate::adapter::PctAdapter;
use crate::cli::DeleteArgs;
use crate::commands::load_fleet;
use crate::ui;
use colored::Colorize;
use convergent::{power_off, GuestAdapter, RetryConfig};
use std::path::Path;
use std::sync::atomic::AtomicBool;

pub fn run(args: &DeleteArgs, catalog_path: &Path) -> anyhow::Result<bool> {
    let fleet = load_fleet(catalog_path)?;
    let specs = fleet.named_specs(&args.ids)?;

    if !args.yes {
        let names: Vec<String> = specs
            .iter()
            .map(|s| format!("{} ({})", s.id, s.config.hostname))
            .collect();
        let question = format!("Destroy {}? This cannot be undone.", names.join(", "));
        if !ui::confirm(&question)? {
            println!("aborted");
            return Ok(false);
        }
    }

    let adapter = PctAdapter::new();
    let retry = RetryConfig::default();
    let cancel = AtomicBool::new(false);
    let mut ok = true;

    for spec in &specs {
        if !adapter.exists(spec.id)? {
            println!("{} {}", spec.id, "not present".dimmed());
            continue;
        }
        // Running guests are stopped before destruction.
        if let Err(e) = power_off(&adapter, spec, &retry, &cancel) {
            eprintln!("{} {}: {e}", spec.id, "stop failed".red());
            ok = false;
            continue;
        }
        match adapter.delete(spec.id) {
            Ok(()) => println!("{} {}", spec.id, "destroyed".green()),
            Err(e) => {
                eprintln!("{} {}: {e}", spec.id, "destroy failed".red());
                ok = false;
            }
        }
    }
    Ok(ok)
}
