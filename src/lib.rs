// edgewatch library - public API

// Re-export error types
pub mod error;
pub use error::{EdgeError, ErrorEvent, Result};

// Module declarations
pub mod commands;
pub mod core;
pub mod platform;

// Re-export commonly used types
pub use core::config::AgentConfig;
pub use core::runtime::{Agent, RunningAgent};

// Initialize logging
pub fn init_logging() {
    init_logging_with(log::LevelFilter::Info);
}

/// Logging with an explicit default level; RUST_LOG still overrides it
pub fn init_logging_with(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
