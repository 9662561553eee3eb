//! `hatchery plan` - print the execution order without touching anything.

use crate::cli::PlanArgs;
use crate::commands::load_fleet;
use colored::Colorize;
use std::path::Path;

pub fn run(args: &PlanArgs, catalog_path: &Path) -> anyhow::Result<bool> {
    let fleet = load_fleet(catalog_path)?;
    let plan = fleet.plan_for(&args.ids)?;

    if plan.is_empty() {
        println!("nothing to do");
        return Ok(true);
    }

    for (index, wave) in plan.waves().iter().enumerate() {
        println!("{} wave {}", "==>".bold().blue(), index + 1);
        for &id in wave {
            let Some(spec) = fleet.catalog.get(id) else {
                continue;
            };
            let deps: Vec<String> = spec.dependency_ids().map(|d| d.to_string()).collect();
            let suffix = if deps.is_empty() {
                String::new()
            } else {
                format!("  after {}", deps.join(", ")).dimmed().to_string()
            };
            println!(
                "    {id}  {} ({}){suffix}",
                spec.config.hostname,
                spec.kind
            );
        }
    }
    println!("{} guest(s) in {} wave(s)", plan.len(), plan.waves().len());
    Ok(true)
}
