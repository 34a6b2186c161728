use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::core::config::AgentConfig;

fn config_path(matches: &clap::ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("config") {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(AgentConfig::default_path()?),
    }
}

pub fn handle_config(root: &clap::ArgMatches, matches: &clap::ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => show(root),
        Some(("init", sub_matches)) => init(root, sub_matches.get_flag("force")),
        _ => {
            println!("Use 'edgewatch config --help' for more information.");
            Ok(())
        }
    }
}

/// Print the effective configuration, defaults included
fn show(root: &clap::ArgMatches) -> Result<()> {
    let path = config_path(root)?;
    let config = AgentConfig::load(Some(&path)).context("Failed to load configuration")?;

    if path.exists() {
        println!("{} {}", "Config file:".dimmed(), path.display().to_string().cyan());
    } else {
        println!(
            "{} {} {}",
            "Config file:".dimmed(),
            path.display().to_string().cyan(),
            "(not found, showing defaults)".yellow()
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init(root: &clap::ArgMatches, force: bool) -> Result<()> {
    let path = config_path(root)?;

    if path.exists() && !force {
        println!(
            "{}",
            format!("⚠️  Config already exists at {}", path.display()).yellow()
        );
        println!("{}", "Use --force to overwrite it with defaults.".dimmed());
        return Ok(());
    }

    AgentConfig::default()
        .save(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} {}",
        "✓ Default configuration written to:".green(),
        path.display()
    );
    Ok(())
}
