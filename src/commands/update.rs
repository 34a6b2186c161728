use anyhow::{Context, Result};
use colored::Colorize;

use crate::core::runtime::Agent;
use crate::core::update::UpdateOutcome;

/// One update cycle in the foreground, including the post-update grace window
pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let config = super::load_config(matches)?;
    let agent = Agent::from_config(config).context("Failed to set up agent")?;

    let trigger = agent.shutdown_trigger();
    ctrlc::set_handler(move || {
        println!();
        println!("{}", "Cancellation requested...".yellow().bold());
        trigger.trigger();
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    println!();
    println!("{}", "━".repeat(50).cyan());
    println!("  {}", "edgewatch update check".bold().cyan());
    println!("{}", "━".repeat(50).cyan());
    println!();
    println!("{}", "Checking for updates...".cyan());

    let runtime = super::runtime()?;
    let outcome = runtime.block_on(agent.check_update_once())?;

    println!();
    match outcome {
        UpdateOutcome::UpToDate(version) => {
            println!(
                "{} {}",
                "✓ Already running the latest version:".green().bold(),
                version.to_string().yellow()
            );
        }
        UpdateOutcome::Updated { from, to } => {
            println!(
                "{} {} → {}",
                "✓ Updated and confirmed healthy:".green().bold(),
                from,
                to.to_string().yellow().bold()
            );
        }
        UpdateOutcome::RolledBack { attempted, restored } => {
            println!(
                "{} {}",
                "✗ Update rolled back, version".red().bold(),
                attempted
            );
            println!("{} {}", "Restored:".dimmed(), restored.to_string().yellow());
        }
        UpdateOutcome::Deferred(reason) => {
            println!("{} {}", "⚠️  Update deferred:".yellow().bold(), reason);
        }
        UpdateOutcome::Cancelled => {
            println!("{}", "Update cancelled.".yellow());
        }
    }
    println!();
    Ok(())
}
