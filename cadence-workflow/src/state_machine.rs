//! Staged process state machine.
//!
//! A process walks an ordered list of stages. Advancing is unconditional;
//! cancelling is only legal before the point of no return. `Cancelled` and
//! `Completed` are absorbing.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a staged process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessOutcome {
    Completed,
    Cancelled,
}

/// Verdict on a cancellation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelDecision {
    /// The process was running before its point of no return and is now cancelled.
    Accepted,
    /// The process is at or past its point of no return and keeps running.
    Rejected,
    /// The process already has an outcome; the attempt changes nothing.
    AlreadyDecided,
}

/// Invalid construction or transition of a staged process
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("staged process needs at least one stage")]
    NoStages,
    #[error("point of no return {0} is not one of the stages")]
    UnknownPointOfNoReturn(String),
    #[error("cancelled status {0} must not be a stage")]
    CancelledIsStage(String),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Status machine for one cancellable staged process
#[derive(Debug, Clone)]
pub struct StagedProcess<S> {
    stages: Vec<S>,
    point_of_no_return: usize,
    cancelled: S,
    current: usize,
    outcome: Option<ProcessOutcome>,
    history: Vec<S>,
}

impl<S> StagedProcess<S>
where
    S: Copy + Eq + Debug,
{
    /// `stages` in order, the first stage a cancellation is rejected in, and
    /// the status value reported once cancelled.
    pub fn new(stages: Vec<S>, point_of_no_return: S, cancelled: S) -> Result<Self, TransitionError> {
        let first = *stages.first().ok_or(TransitionError::NoStages)?;
        let point_of_no_return = stages
            .iter()
            .position(|s| *s == point_of_no_return)
            .ok_or_else(|| TransitionError::UnknownPointOfNoReturn(format!("{:?}", point_of_no_return)))?;
        if stages.contains(&cancelled) {
            return Err(TransitionError::CancelledIsStage(format!("{:?}", cancelled)));
        }

        Ok(Self {
            stages,
            point_of_no_return,
            cancelled,
            current: 0,
            outcome: None,
            history: vec![first],
        })
    }

    /// Current status; the cancelled value once cancelled.
    pub fn status(&self) -> S {
        match self.outcome {
            Some(ProcessOutcome::Cancelled) => self.cancelled,
            _ => self.stages[self.current],
        }
    }

    pub fn stages(&self) -> &[S] {
        &self.stages
    }

    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.outcome
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == Some(ProcessOutcome::Cancelled)
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Some(ProcessOutcome::Completed)
    }

    /// Statuses visited so far, in order.
    pub fn history(&self) -> &[S] {
        &self.history
    }

    pub fn can_cancel(&self) -> bool {
        self.outcome.is_none() && self.current < self.point_of_no_return
    }

    /// Apply a cancellation attempt.
    pub fn request_cancel(&mut self) -> CancelDecision {
        if self.outcome.is_some() {
            return CancelDecision::AlreadyDecided;
        }
        if !self.can_cancel() {
            return CancelDecision::Rejected;
        }
        self.outcome = Some(ProcessOutcome::Cancelled);
        self.history.push(self.cancelled);
        CancelDecision::Accepted
    }

    /// Apply a cancellation attempt. `true` if it was accepted.
    pub fn try_cancel(&mut self) -> bool {
        self.request_cancel() == CancelDecision::Accepted
    }

    /// Move to the next stage. `Ok(None)` when already at the last stage.
    pub fn advance(&mut self) -> Result<Option<S>, TransitionError> {
        if self.outcome.is_some() {
            return Err(self.invalid("next stage"));
        }
        if self.current + 1 >= self.stages.len() {
            return Ok(None);
        }
        self.current += 1;
        let stage = self.stages[self.current];
        self.history.push(stage);
        Ok(Some(stage))
    }

    /// Finish the process from its last stage.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        if self.outcome.is_some() || self.current + 1 != self.stages.len() {
            return Err(self.invalid("Completed"));
        }
        self.outcome = Some(ProcessOutcome::Completed);
        Ok(())
    }

    fn invalid(&self, to: &str) -> TransitionError {
        TransitionError::InvalidTransition {
            from: format!("{:?}", self.status()),
            to: to.to_string(),
        }
    }
}

/// Staged process shared between the coordinator and signal handlers.
///
/// Signal handlers run strictly between suspension points of the
/// coordinator, so the lock is never contended by workflow code itself.
#[derive(Debug)]
pub struct SharedProcess<S> {
    inner: Arc<Mutex<StagedProcess<S>>>,
}

impl<S> Clone for SharedProcess<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> SharedProcess<S>
where
    S: Copy + Eq + Debug,
{
    pub fn new(process: StagedProcess<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(process)),
        }
    }

    pub fn status(&self) -> S {
        self.inner.lock().status()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().is_cancelled()
    }

    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.inner.lock().outcome()
    }

    pub fn request_cancel(&self) -> CancelDecision {
        self.inner.lock().request_cancel()
    }

    pub fn try_cancel(&self) -> bool {
        self.inner.lock().try_cancel()
    }

    pub fn advance(&self) -> Result<Option<S>, TransitionError> {
        self.inner.lock().advance()
    }

    pub fn complete(&self) -> Result<(), TransitionError> {
        self.inner.lock().complete()
    }

    pub fn snapshot(&self) -> StagedProcess<S> {
        self.inner.lock().clone()
    }
}
