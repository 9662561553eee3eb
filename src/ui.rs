//! Terminal output: colored run progress and the shared confirmation prompt.

use colored::Colorize;
use convergent::{Aspect, AspectState, GuestId, GuestStatus, ProgressCallback, RunSummary};
use std::io::{self, BufRead, Write};

/// Progress reporter printing one line per wave and per completed guest.
pub struct ConsoleProgress {
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_wave_start(&mut self, wave: usize, guests: &[GuestId]) {
        if self.quiet || guests.is_empty() {
            return;
        }
        let ids: Vec<String> = guests.iter().map(ToString::to_string).collect();
        println!(
            "{} wave {} ({})",
            "==>".bold().blue(),
            wave + 1,
            ids.join(", ")
        );
    }

    fn on_guest_complete(&mut self, id: GuestId, status: &GuestStatus) {
        if self.quiet && status.is_success() {
            return;
        }
        println!("    {id} {}", render_status(status));
    }
}

/// One colored word (plus detail) for a guest outcome.
pub fn render_status(status: &GuestStatus) -> String {
    match status {
        GuestStatus::Converged => "converged".green().to_string(),
        GuestStatus::Unchanged => "unchanged".dimmed().to_string(),
        GuestStatus::Failed { stage, reason } => {
            format!("{} at {stage}: {reason}", "failed".red().bold())
        }
        GuestStatus::Blocked { on } => {
            format!("{} (dependency {on} failed)", "blocked".yellow())
        }
        GuestStatus::Cancelled => "cancelled".yellow().to_string(),
    }
}

/// Colored rendering of an aspect's current state for status output.
pub fn render_aspect(aspect: Aspect, state: &AspectState) -> String {
    let verdict = match state {
        AspectState::Matching => "ok".green().to_string(),
        AspectState::Absent => "absent".red().to_string(),
        AspectState::Divergent { detail } => format!("{} ({detail})", "divergent".yellow()),
    };
    format!("{:<12} {verdict}", aspect.as_str())
}

/// Print the closing tally of a run.
pub fn print_summary(summary: &RunSummary) {
    let line = format!(
        "{} succeeded, {} failed or blocked",
        summary.succeeded(),
        summary.unsuccessful()
    );
    if summary.is_success() {
        println!("{} {line}", "done:".green().bold());
    } else {
        println!("{} {line}", "done:".red().bold());
    }
}

/// Ask the user to confirm a mutating operation. Non-interactive stdin
/// (closed or empty) counts as a refusal.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
