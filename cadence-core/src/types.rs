//! Core types for Cadence client.
//!
//! This module defines the identifiers and descriptors shared by the
//! host, the client and workflow logic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Workflow execution identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: String,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Workflow type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowType {
    pub name: String,
}

impl WorkflowType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Information about the running workflow, available from its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow_execution: WorkflowExecution,
    pub workflow_type: WorkflowType,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// Options for starting a workflow execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartWorkflowOptions {
    /// Caller-supplied id. A random one is generated when absent.
    pub id: Option<String>,
    /// Default bound for synchronous signals sent to this instance when the
    /// caller does not supply one.
    pub signal_reply_timeout: Option<Duration>,
}

impl StartWorkflowOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// State of a workflow execution as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl WorkflowExecutionStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, WorkflowExecutionStatus::Running)
    }
}

impl fmt::Display for WorkflowExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowExecutionStatus::Running => write!(f, "RUNNING"),
            WorkflowExecutionStatus::Completed => write!(f, "COMPLETED"),
            WorkflowExecutionStatus::Failed => write!(f, "FAILED"),
        }
    }
}
