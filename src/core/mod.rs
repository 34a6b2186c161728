// Core agent logic

pub mod checksum_manager;
pub mod config;
pub mod dispatch;
pub mod runtime;
pub mod shutdown;
pub mod state_store;
pub mod system_monitor;
pub mod tasks;
pub mod telemetry;
pub mod update;

// Re-export commonly used items
pub use config::{AgentConfig, ConfigPatch, RuntimeSettings};
pub use dispatch::{CommandHandle, CommandResponse};
pub use runtime::{Agent, RunningAgent};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use state_store::{PersistedState, StateStore};
