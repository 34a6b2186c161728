use anyhow::{Context, Result};
use colored::Colorize;

use crate::core::runtime::Agent;

/// Run the agent in the foreground until Ctrl+C
pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let config = super::load_config(matches)?;
    let device_id = config.device.id.clone();
    let agent = Agent::from_config(config).context("Failed to set up agent")?;

    // Setup Ctrl+C handler
    let trigger = agent.shutdown_trigger();
    ctrlc::set_handler(move || {
        println!();
        println!("{}", "Shutdown requested...".yellow().bold());
        println!(
            "{}",
            "Waiting for in-flight work to reach a safe point...".dimmed()
        );
        trigger.trigger();
    })
    .map_err(|e| anyhow::anyhow!("Failed to set Ctrl+C handler: {}", e))?;

    println!(
        "{} {}",
        "Starting edgewatch agent for".cyan().bold(),
        device_id.bold()
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());

    let runtime = super::runtime()?;
    runtime.block_on(async move {
        let running = agent.start().context("Failed to start agent")?;
        running.run_until_shutdown().await;
        Ok::<(), anyhow::Error>(())
    })?;

    println!("{}", "✓ Agent stopped cleanly".green());
    Ok(())
}
