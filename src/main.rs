mod adapter;
mod cli;
mod commands;
mod config;
mod ui;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use commands::power::PowerAction;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let catalog_path = config::resolve_catalog_path(cli.catalog.clone())?;

    match &cli.command {
        Commands::Converge(args) => commands::converge::run(args, &catalog_path, cli.quiet),
        Commands::Plan(args) => commands::plan::run(args, &catalog_path),
        Commands::Start(args) => commands::power::run(PowerAction::Start, args, &catalog_path),
        Commands::Stop(args) => commands::power::run(PowerAction::Stop, args, &catalog_path),
        Commands::Restart(args) => commands::power::run(PowerAction::Restart, args, &catalog_path),
        Commands::Delete(args) => commands::delete::run(args, &catalog_path),
        Commands::Status(args) => commands::status::run(args, &catalog_path),
    }
}
