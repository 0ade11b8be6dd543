//! Error types for the Cadence workflow coordinator.
//!
//! This module defines the error taxonomy shared by workflow logic, the
//! in-process host and external callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::encoded::EncodingError;

/// A bounded dequeue found nothing before its deadline.
///
/// Workflow logic treats this as "no signal this round"; it is never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("QueueTimeoutError: queue={queue}, timeout={timeout:?}")]
pub struct QueueTimeoutError {
    pub queue: String,
    pub timeout: Duration,
}

impl QueueTimeoutError {
    pub fn new(queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            queue: queue.into(),
            timeout,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Workflow logic replied twice to the same synchronous signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("AlreadyRepliedError: request_id={request_id}")]
pub struct AlreadyRepliedError {
    pub request_id: Uuid,
}

impl AlreadyRepliedError {
    pub fn new(request_id: Uuid) -> Self {
        Self { request_id }
    }
}

/// Failures surfaced to the caller of a synchronous signal.
///
/// `Timeout` and `Abandoned` are kept apart so a caller can tell "nobody
/// answered in time" from "the instance is gone".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("SignalTimeoutError: signal={signal_name}, request_id={request_id}, timeout={timeout:?}")]
    Timeout {
        signal_name: String,
        request_id: Uuid,
        timeout: Duration,
    },

    #[error("SignalAbandonedError: workflow_id={workflow_id}, signal={signal_name}, request_id={request_id}")]
    Abandoned {
        workflow_id: String,
        signal_name: String,
        request_id: Uuid,
    },
}

impl SignalError {
    pub fn request_id(&self) -> Uuid {
        match self {
            SignalError::Timeout { request_id, .. } | SignalError::Abandoned { request_id, .. } => {
                *request_id
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SignalError::Timeout { .. })
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, SignalError::Abandoned { .. })
    }
}

/// Failure reported by an activity invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ActivityError {
    #[error("ActivityFailure: activity_type={activity_type}, reason={reason}")]
    Failed {
        activity_type: String,
        reason: String,
    },

    #[error("ActivityNotRegistered: activity_type={0}")]
    NotRegistered(String),

    #[error("ActivityFailure: activity_type={activity_type}, encoding: {source}")]
    Encoding {
        activity_type: String,
        #[source]
        source: EncodingError,
    },
}

impl ActivityError {
    pub fn failed(activity_type: impl Into<String>, reason: impl Into<String>) -> Self {
        ActivityError::Failed {
            activity_type: activity_type.into(),
            reason: reason.into(),
        }
    }

    pub fn activity_type(&self) -> &str {
        match self {
            ActivityError::Failed { activity_type, .. }
            | ActivityError::Encoding { activity_type, .. } => activity_type,
            ActivityError::NotRegistered(activity_type) => activity_type,
        }
    }
}

/// Reason for non-determinism error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NonDeterminismReason {
    #[error("missing replay event")]
    MissingReplayEvent,
    #[error("extra replay event")]
    ExtraReplayEvent,
    #[error("mismatch")]
    Mismatch,
}

/// Replayed workflow logic diverged from its recorded history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("NonDeterministicError: reason={reason}, workflow_type={workflow_type}, workflow_id={workflow_id}, expected={expected:?}, actual={actual:?}")]
pub struct NonDeterministicError {
    pub reason: NonDeterminismReason,
    pub workflow_type: String,
    pub workflow_id: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Error type for panics in workflows
#[derive(Debug, Clone, Error)]
#[error("PanicError: message={message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extract a readable message from a `catch_unwind` payload.
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }
}

/// Server error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("EntityNotExistsError: {message}")]
    EntityNotExists { message: String },

    #[error("BadRequestError: {message}")]
    BadRequest { message: String },

    #[error("WorkflowExecutionAlreadyStartedError: {message}")]
    WorkflowExecutionAlreadyStarted { message: String },

    #[error("WorkflowExecutionAlreadyCompletedError: {message}")]
    WorkflowExecutionAlreadyCompleted { message: String },

    #[error("QueryFailedError: {message}")]
    QueryFailed { message: String },
}

/// Error returned to callers outside a workflow.
///
/// Queue timeouts and double replies stay inside workflow logic. Panics and
/// replay divergence surface as a failed instance instead.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("Workflow execution failed: {0}")]
    WorkflowExecutionFailed(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl CadenceError {
    pub fn is_signal_timeout(&self) -> bool {
        matches!(self, CadenceError::Signal(e) if e.is_timeout())
    }

    pub fn is_signal_abandoned(&self) -> bool {
        matches!(self, CadenceError::Signal(e) if e.is_abandoned())
    }

    pub fn is_already_started(&self) -> bool {
        matches!(
            self,
            CadenceError::Server(ServerError::WorkflowExecutionAlreadyStarted { .. })
        )
    }
}

pub type CadenceResult<T> = Result<T, CadenceError>;
