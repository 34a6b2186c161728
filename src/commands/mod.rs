// Command handlers module
pub mod completions;
pub mod config;
pub mod run;
pub mod status;
pub mod update;
pub mod version;

use anyhow::{Context, Result};
use std::path::Path;

use crate::core::config::AgentConfig;

// Re-exports for cleaner imports
pub use version::execute as version;

/// Config named by the global `--config` flag, or the default location
pub(crate) fn load_config(matches: &clap::ArgMatches) -> Result<AgentConfig> {
    let path = matches.get_one::<String>("config").map(Path::new);
    AgentConfig::load(path).context("Failed to load configuration")
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
