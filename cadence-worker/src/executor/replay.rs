//! History replay.
//!
//! [`WorkflowReplayer`] re-executes registered workflow logic against a
//! recorded [`WorkflowHistory`]. Every suspension point reads its outcome
//! from the history instead of waiting, so a replay finishes immediately.
//! Any divergence between the logic and the recorded events is reported as
//! a [`NonDeterministicError`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cadence_core::{NonDeterminismReason, NonDeterministicError, Payload};
use cadence_workflow::{EventAttributes, WorkflowContext, WorkflowError, WorkflowHistory};
use futures::FutureExt;

use crate::executor::instance::InstanceOutcome;
use crate::registry::WorkflowRegistry;

/// Replay failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid history: {0}")]
    InvalidHistory(String),
    #[error("workflow type not registered: {0}")]
    WorkflowNotRegistered(String),
    #[error(transparent)]
    NonDeterministic(#[from] NonDeterministicError),
}

/// Replays recorded histories against registered workflows
#[derive(Clone)]
pub struct WorkflowReplayer {
    registry: Arc<WorkflowRegistry>,
}

impl WorkflowReplayer {
    pub fn new(registry: Arc<WorkflowRegistry>) -> Self {
        Self { registry }
    }

    /// Replay a closed history and check that the logic reproduces it,
    /// including its result. Returns the replayed result.
    pub async fn replay_workflow_history(&self, history: &WorkflowHistory) -> Result<Result<Payload, String>, ReplayError> {
        let recorded = history
            .close_event()
            .map(|event| event.attributes.clone())
            .ok_or_else(|| ReplayError::InvalidHistory("history has no close event".to_string()))?;

        let (ctx, input) = WorkflowContext::replay(history).map_err(|e| ReplayError::InvalidHistory(e.to_string()))?;
        let workflow_type = ctx.workflow_info().workflow_type.name.clone();
        let workflow = self
            .registry
            .get(&workflow_type)
            .ok_or_else(|| ReplayError::WorkflowNotRegistered(workflow_type.clone()))?;

        tracing::debug!(
            workflow_id = %ctx.workflow_info().workflow_execution.workflow_id,
            %workflow_type,
            events = history.len(),
            "replaying history"
        );

        let result = AssertUnwindSafe(workflow(ctx.clone(), input)).catch_unwind().await;
        if let Some(err) = ctx.nondeterminism() {
            return Err(err.into());
        }
        ctx.finish_replay().map_err(|err| match err {
            WorkflowError::NonDeterministic(err) => ReplayError::NonDeterministic(err),
            other => ReplayError::InvalidHistory(other.to_string()),
        })?;

        let replayed = InstanceOutcome::from_result(result).as_result();
        let matches = match (&recorded, &replayed) {
            (EventAttributes::WorkflowExecutionCompleted { result }, Ok(value)) => result == value,
            (EventAttributes::WorkflowExecutionFailed { reason }, Err(replayed)) => reason == replayed,
            _ => false,
        };
        if !matches {
            return Err(NonDeterministicError {
                reason: NonDeterminismReason::Mismatch,
                workflow_type,
                workflow_id: ctx.workflow_info().workflow_execution.workflow_id.clone(),
                expected: Some(recorded.to_string()),
                actual: Some(match &replayed {
                    Ok(value) => format!("completed with {}", value),
                    Err(reason) => format!("failed with {}", reason),
                }),
            }
            .into());
        }
        Ok(replayed)
    }
}
