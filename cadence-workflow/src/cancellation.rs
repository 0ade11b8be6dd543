//! Cancellation of staged processes.
//!
//! [`StagedCoordinator`] runs a [`StagedProcess`] stage by stage and asks a
//! [`CancellationDetector`] after every stage whether the process has been
//! cancelled. Two detectors are provided:
//!
//! * [`FieldPolling`] installs a signal handler that writes the cancellation
//!   straight into the shared process status; the coordinator reads it back.
//! * [`QueueMediated`] listens on a queue of synchronous requests and, after
//!   every stage, takes whatever requests arrived within a short poll timeout,
//!   replying to each with whether it was accepted.
//!
//! A request that arrives once the process is already cancelled gets no
//! answer: its caller sees the request abandoned, not rejected.
//!
//! Either way the state machine decides: a cancellation is accepted only
//! before the point of no return.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::Payload;

use crate::context::WorkflowContext;
use crate::future::WorkflowError;
use crate::queue::SignalQueue;
use crate::signal::SignalRequest;
use crate::state_machine::{CancelDecision, SharedProcess, StagedProcess};

/// Default bound of the dequeue performed after each stage.
pub const DEFAULT_CANCELLATION_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Strategy for noticing cancellation requests between stages
#[async_trait]
pub trait CancellationDetector<S>: Send
where
    S: Copy + Eq + Debug + Send + Sync + 'static,
{
    /// Start listening. Called once before the first stage.
    fn install(&mut self, ctx: &WorkflowContext, process: &SharedProcess<S>);

    /// Called after every stage. `true` once the process is cancelled.
    async fn detect(&mut self, ctx: &WorkflowContext, process: &SharedProcess<S>) -> Result<bool, WorkflowError>;
}

/// Cancellation written directly into the process status by a signal handler
#[derive(Debug, Clone)]
pub struct FieldPolling {
    signal_name: String,
}

impl FieldPolling {
    pub fn new(signal_name: impl Into<String>) -> Self {
        Self {
            signal_name: signal_name.into(),
        }
    }
}

#[async_trait]
impl<S> CancellationDetector<S> for FieldPolling
where
    S: Copy + Eq + Debug + Send + Sync + 'static,
{
    fn install(&mut self, ctx: &WorkflowContext, process: &SharedProcess<S>) {
        let process = process.clone();
        let workflow_id = ctx.workflow_info().workflow_execution.workflow_id.clone();
        // Arguments are ignored; any payload counts as a request. Once the
        // outcome is decided the caller is abandoned rather than answered.
        ctx.set_signal_handler_or_abandon(&self.signal_name, move |_: Payload| {
            let decision = process.request_cancel();
            tracing::info!(%workflow_id, ?decision, status = ?process.status(), "cancellation requested");
            match decision {
                CancelDecision::Accepted => Some(true),
                CancelDecision::Rejected => Some(false),
                CancelDecision::AlreadyDecided => None,
            }
        });
    }

    async fn detect(&mut self, _ctx: &WorkflowContext, process: &SharedProcess<S>) -> Result<bool, WorkflowError> {
        Ok(process.is_cancelled())
    }
}

/// Cancellation requests read from a queue of synchronous signals
#[derive(Debug)]
pub struct QueueMediated {
    signal_name: String,
    poll_timeout: Duration,
    queue: Option<SignalQueue<SignalRequest<bool>>>,
}

impl QueueMediated {
    pub fn new(signal_name: impl Into<String>) -> Self {
        Self {
            signal_name: signal_name.into(),
            poll_timeout: DEFAULT_CANCELLATION_POLL_TIMEOUT,
            queue: None,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

#[async_trait]
impl<S> CancellationDetector<S> for QueueMediated
where
    S: Copy + Eq + Debug + Send + Sync + 'static,
{
    fn install(&mut self, ctx: &WorkflowContext, _process: &SharedProcess<S>) {
        self.queue = Some(ctx.new_queue(&self.signal_name));
    }

    async fn detect(&mut self, ctx: &WorkflowContext, process: &SharedProcess<S>) -> Result<bool, WorkflowError> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| WorkflowError::Generic("cancellation queue not installed".to_string()))?;

        // Wait up to the poll timeout for the first request, then drain the
        // rest. Requests left behind an accepted one are abandoned when the
        // instance closes.
        let mut limit = self.poll_timeout;
        loop {
            let request = match queue.dequeue(ctx, Some(limit)).await {
                Ok(request) => request,
                Err(WorkflowError::QueueTimeout(_)) => return Ok(process.is_cancelled()),
                Err(err) => return Err(err),
            };
            let decision = process.request_cancel();
            tracing::info!(
                workflow_id = %ctx.workflow_info().workflow_execution.workflow_id,
                request_id = %request.id(),
                ?decision,
                status = ?process.status(),
                "cancellation requested"
            );
            match decision {
                CancelDecision::Accepted => {
                    request.reply(ctx, true)?;
                    return Ok(true);
                }
                CancelDecision::Rejected => {
                    request.reply(ctx, false)?;
                    limit = Duration::ZERO;
                }
                CancelDecision::AlreadyDecided => return Ok(process.is_cancelled()),
            }
        }
    }
}

/// Runs a staged process under a cancellation detector
pub struct StagedCoordinator<S, D> {
    process: SharedProcess<S>,
    detector: D,
}

impl<S, D> StagedCoordinator<S, D>
where
    S: Copy + Eq + Debug + Send + Sync + 'static,
    D: CancellationDetector<S>,
{
    pub fn new(process: StagedProcess<S>, detector: D) -> Self {
        Self {
            process: SharedProcess::new(process),
            detector,
        }
    }

    /// Shared status, e.g. for a query handler.
    pub fn process(&self) -> SharedProcess<S> {
        self.process.clone()
    }

    /// Run `work` for each stage in order.
    ///
    /// Returns `true` if the last stage finished without cancellation and
    /// `false` if the process was cancelled.
    pub async fn run<F, Fut>(mut self, ctx: &WorkflowContext, mut work: F) -> Result<bool, WorkflowError>
    where
        F: FnMut(S) -> Fut + Send,
        Fut: Future<Output = Result<(), WorkflowError>> + Send,
    {
        let workflow_id = ctx.workflow_info().workflow_execution.workflow_id.clone();
        self.detector.install(ctx, &self.process);

        let mut stage = self.process.status();
        loop {
            tracing::info!(%workflow_id, ?stage, "stage started");
            work(stage).await?;

            if self.detector.detect(ctx, &self.process).await? {
                tracing::info!(%workflow_id, ?stage, "process cancelled");
                return Ok(false);
            }

            match self.process.advance()? {
                Some(next) => stage = next,
                None => {
                    self.process.complete()?;
                    tracing::info!(%workflow_id, "process completed");
                    return Ok(true);
                }
            }
        }
    }
}
