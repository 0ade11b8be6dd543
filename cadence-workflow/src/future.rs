//! Workflow futures and the error type workflow logic returns.

use std::future::Future;
use std::pin::Pin;

use cadence_core::{
    ActivityError, AlreadyRepliedError, EncodingError, NonDeterministicError, Payload,
    QueueTimeoutError,
};

use crate::state_machine::TransitionError;

/// Boxed root future of a workflow instance
pub type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Payload, WorkflowError>> + Send>>;

/// Workflow error
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    QueueTimeout(#[from] QueueTimeoutError),
    #[error("Queue closed: {0}")]
    QueueClosed(String),
    #[error(transparent)]
    AlreadyReplied(#[from] AlreadyRepliedError),
    #[error(transparent)]
    Activity(#[from] ActivityError),
    #[error(transparent)]
    NonDeterministic(#[from] NonDeterministicError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Generic error: {0}")]
    Generic(String),
}

impl WorkflowError {
    pub fn is_queue_timeout(&self) -> bool {
        matches!(self, WorkflowError::QueueTimeout(_))
    }
}
