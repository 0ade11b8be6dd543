//! Instance execution and history replay.

pub mod instance;
pub mod replay;

pub use instance::InstanceOutcome;
pub use replay::{ReplayError, WorkflowReplayer};
