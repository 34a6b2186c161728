use anyhow::{Context, Result};
use colored::Colorize;

use crate::core::state_store::PersistedState;
use crate::core::system_monitor::Severity;
use crate::core::update::UpdatePhase;

const SHOWN_TRANSITIONS: usize = 5;
const SHOWN_ALERTS: usize = 5;

/// Print the persisted agent state without starting the agent
pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let config = super::load_config(matches)?;
    let path = config.state_path()?;

    if !path.exists() {
        println!("{}", "No agent state recorded yet.".yellow());
        println!("{} {}", "Expected at:".dimmed(), path.display());
        return Ok(());
    }

    let state = PersistedState::load(&path)
        .with_context(|| format!("Failed to read state from {}", path.display()))?;
    let update = &state.update;

    println!();
    println!("{}", "━".repeat(50).cyan());
    println!("  {}", "edgewatch status".bold().cyan());
    println!("{}", "━".repeat(50).cyan());
    println!();

    println!("{} {}", "Device:".dimmed(), config.device.id.bold());
    println!(
        "{} {}",
        "Running version:".dimmed(),
        update.current_version.to_string().yellow().bold()
    );

    let phase = update.phase.to_string();
    let phase = if update.phase == UpdatePhase::Idle {
        phase.green()
    } else {
        phase.yellow().bold()
    };
    println!("{} {}", "Update phase:".dimmed(), phase);

    if let Some(candidate) = &update.candidate_version {
        println!("{} {}", "Candidate:".dimmed(), candidate);
    }
    if let Some(previous) = &update.previous_version {
        println!("{} {}", "Previous:".dimmed(), previous);
    }
    if let Some(checksum) = &state.last_known_good_checksum {
        println!("{} {}", "Last known good:".dimmed(), checksum.dimmed());
    }
    if let Some(err) = &update.last_error {
        println!(
            "{} {} {}",
            "Last error:".dimmed(),
            format!("[{}]", err.kind).red(),
            err.message
        );
    }

    println!();
    match &state.last_health_check {
        Some(check) => {
            let score = format!("{:.1}", check.score);
            let score = if check.score >= 80.0 {
                score.green()
            } else if check.score >= 50.0 {
                score.yellow()
            } else {
                score.red()
            };
            println!(
                "{} {} {}",
                "Health score:".dimmed(),
                score.bold(),
                format!("(at {})", check.at.format("%Y-%m-%d %H:%M:%S UTC")).dimmed()
            );
        }
        None => println!("{}", "No health check recorded yet.".dimmed()),
    }

    if !state.transitions.is_empty() {
        println!();
        println!("{}:", "Recent update transitions".bold());
        for t in state.transitions.iter().rev().take(SHOWN_TRANSITIONS) {
            println!(
                "  {} {} → {} {}",
                t.at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                t.from,
                t.to,
                t.candidate
                    .as_ref()
                    .map(|c| format!("(candidate {})", c))
                    .unwrap_or_default()
                    .dimmed()
            );
        }
    }

    if !state.alert_history.is_empty() {
        println!();
        println!("{}:", "Recent alerts".bold());
        for alert in state.alert_history.iter().rev().take(SHOWN_ALERTS) {
            let label = match alert.severity {
                Severity::Critical => "CRITICAL".red().bold(),
                Severity::Warning => "WARNING".yellow(),
                Severity::Normal => "OK".green(),
            };
            println!(
                "  {} {:<9} {}",
                alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                label,
                alert.message
            );
        }
    }

    println!();
    Ok(())
}
