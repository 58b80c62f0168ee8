mod commands;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod status;
mod types;

#[cfg(test)]
mod tests;

pub use commands::handle_command;
pub use orchestrator::DepthcamOrchestrator;
pub use status::format_record_time;
pub use types::{ComponentState, ShutdownReason};
