//! `hatchery status` - current vs desired state, inspections only.

use crate::adapter::PctAdapter;
use crate::cli::StatusArgs;
use crate::commands::load_fleet;
use crate::ui;
use colored::Colorize;
use convergent::inspect_guest;
use std::path::Path;

pub fn run(args: &StatusArgs, catalog_path: &Path) -> anyhow::Result<bool> {
    let fleet = load_fleet(catalog_path)?;
    let specs = if args.ids.is_empty() {
        fleet
            .catalog
            .ids()
            .filter_map(|id| fleet.catalog.resolved_spec(id))
            .collect()
    } else {
        fleet.named_specs(&args.ids)?
    };

    let adapter = PctAdapter::new();
    let mut all_converged = true;

    for spec in &specs {
        let states = inspect_guest(&adapter, spec)?;
        let divergent = states.iter().filter(|(_, s)| !s.is_matching()).count();
        if divergent == 0 {
            println!(
                "{} {} ({}, {}) {}",
                "==>".bold().blue(),
                spec.id,
                spec.config.hostname,
                spec.kind,
                "converged".green()
            );
            continue;
        }
        all_converged = false;
        println!(
            "{} {} ({}, {})",
            "==>".bold().blue(),
            spec.id,
            spec.config.hostname,
            spec.kind
        );
        for (aspect, state) in &states {
            println!("    {}", ui::render_aspect(*aspect, state));
        }
    }
    Ok(all_converged)
}
