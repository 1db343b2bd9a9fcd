//! Worker execution
//!
//! Type-state bootstrap chain ending in process replacement, plus the
//! signal-forwarding supervisor used when bootbox runs as PID 1.

pub mod command;
pub mod forward;
pub mod preexec;

pub use command::WorkerCommand;
pub use preexec::{Bootstrap, BuildPending, Configured, Provisioned, Running};
