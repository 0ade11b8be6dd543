//! Activity execution context.

use cadence_core::WorkflowExecution;

/// Information about the activity being executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub activity_id: String,
    pub activity_type: String,
    pub workflow_execution: WorkflowExecution,
    pub attempt: u32,
}

/// Context handed to activity implementations.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    info: ActivityInfo,
}

impl ActivityContext {
    pub fn new(info: ActivityInfo) -> Self {
        Self { info }
    }

    pub fn activity_info(&self) -> &ActivityInfo {
        &self.info
    }
}
