//! Long-running agent tasks.
//!
//! Each task owns the state it mutates and listens for the shared shutdown
//! signal. Cross-task data moves through watch and mpsc channels only.

mod commands;
mod sampling;
mod update;

pub use commands::command_task;
pub use sampling::{sampling_task, SamplingContext};
pub use update::update_task;
