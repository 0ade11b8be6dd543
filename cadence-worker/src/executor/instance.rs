//! Instance driver.
//!
//! Each workflow instance runs on its own tokio task. The task owns the
//! workflow future and an inbox of commands from the outside world; commands
//! are applied strictly between polls of the future, so signal handlers and
//! queries never run concurrently with workflow code. A handler that panics
//! fails the instance the same way a panicking workflow does.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cadence_activity::ActivityInvoker;
use cadence_core::{CadenceResult, PanicError, Payload, WorkflowExecution, WorkflowExecutionStatus, WorkflowInfo};
use cadence_workflow::{SignalDelivery, SignalGateway, WorkflowContext, WorkflowError, WorkflowHistory};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};

use crate::registry::WorkflowFn;

/// Terminal state of an instance
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceOutcome {
    Completed(Payload),
    Failed(String),
}

impl InstanceOutcome {
    pub fn status(&self) -> WorkflowExecutionStatus {
        match self {
            InstanceOutcome::Completed(_) => WorkflowExecutionStatus::Completed,
            InstanceOutcome::Failed(_) => WorkflowExecutionStatus::Failed,
        }
    }

    pub(crate) fn from_result(result: Result<Result<Payload, WorkflowError>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(Ok(value)) => InstanceOutcome::Completed(value),
            Ok(Err(err)) => InstanceOutcome::Failed(err.to_string()),
            Err(panic) => InstanceOutcome::Failed(PanicError::from_payload(&*panic).to_string()),
        }
    }

    pub(crate) fn as_result(&self) -> Result<Payload, String> {
        match self {
            InstanceOutcome::Completed(value) => Ok(value.clone()),
            InstanceOutcome::Failed(reason) => Err(reason.clone()),
        }
    }
}

#[derive(Debug)]
pub(crate) enum InstanceCommand {
    Signal(SignalDelivery),
    Query {
        query_type: String,
        respond: oneshot::Sender<CadenceResult<Payload>>,
    },
}

/// Host-side record of one running or closed instance.
pub(crate) struct InstanceRecord {
    execution: WorkflowExecution,
    context: WorkflowContext,
    gateway: Arc<SignalGateway>,
    signal_reply_timeout: Option<Duration>,
    inbox: mpsc::UnboundedSender<InstanceCommand>,
    outcome: watch::Receiver<Option<InstanceOutcome>>,
}

impl InstanceRecord {
    /// Create the instance and spawn its driver task.
    pub(crate) fn spawn(
        info: WorkflowInfo,
        workflow: WorkflowFn,
        input: Payload,
        activities: Arc<dyn ActivityInvoker>,
        queue_capacity: Option<usize>,
        signal_reply_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let execution = info.workflow_execution.clone();
        let gateway = Arc::new(SignalGateway::new(execution.workflow_id.clone()));
        let context = WorkflowContext::new(info, &input, activities, gateway.clone(), queue_capacity);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let future = workflow(context.clone(), input);
        tokio::spawn(drive(context.clone(), future, inbox_rx, outcome_tx));

        Arc::new(Self {
            execution,
            context,
            gateway,
            signal_reply_timeout,
            inbox: inbox_tx,
            outcome: outcome_rx,
        })
    }

    pub(crate) fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub(crate) fn start_time(&self) -> DateTime<Utc> {
        self.context.workflow_info().start_time
    }

    pub(crate) fn gateway(&self) -> &Arc<SignalGateway> {
        &self.gateway
    }

    pub(crate) fn signal_reply_timeout(&self) -> Option<Duration> {
        self.signal_reply_timeout
    }

    pub(crate) fn status(&self) -> WorkflowExecutionStatus {
        match &*self.outcome.borrow() {
            Some(outcome) => outcome.status(),
            None => WorkflowExecutionStatus::Running,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.status().is_closed()
    }

    pub(crate) fn history(&self) -> WorkflowHistory {
        self.context.history()
    }

    /// Hand a command to the driver. Gives the command back if the driver has
    /// stopped taking commands.
    pub(crate) fn send(&self, command: InstanceCommand) -> Result<(), InstanceCommand> {
        self.inbox.send(command).map_err(|err| err.0)
    }

    /// Run a query on a closed instance. Nothing else touches the context then.
    pub(crate) fn query_closed(&self, query_type: &str) -> CadenceResult<Payload> {
        self.context.query(query_type)
    }

    pub(crate) async fn wait_outcome(&self) -> InstanceOutcome {
        let mut receiver = self.outcome.clone();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| InstanceOutcome::Failed("instance driver stopped".to_string()))
    }
}

async fn drive(
    ctx: WorkflowContext,
    future: BoxFuture<'static, Result<Payload, WorkflowError>>,
    mut inbox: mpsc::UnboundedReceiver<InstanceCommand>,
    outcome_tx: watch::Sender<Option<InstanceOutcome>>,
) {
    let execution = ctx.workflow_info().workflow_execution.clone();
    tracing::info!(
        workflow_id = %execution.workflow_id,
        run_id = %execution.run_id,
        workflow_type = %ctx.workflow_info().workflow_type.name,
        "workflow started"
    );

    let mut workflow = AssertUnwindSafe(future).catch_unwind();
    let mut inbox_open = true;
    let result = loop {
        // The workflow is polled first so its handlers exist before any
        // command is applied.
        tokio::select! {
            biased;
            result = &mut workflow => break result,
            command = inbox.recv(), if inbox_open => match command {
                Some(command) => {
                    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| apply(&ctx, command))) {
                        break Err(panic);
                    }
                }
                None => inbox_open = false,
            },
        }
    };

    let outcome = InstanceOutcome::from_result(result);
    match &outcome {
        InstanceOutcome::Completed(result) => {
            tracing::info!(workflow_id = %execution.workflow_id, %result, "workflow completed")
        }
        InstanceOutcome::Failed(reason) => {
            tracing::warn!(workflow_id = %execution.workflow_id, %reason, "workflow failed")
        }
    }

    ctx.record_close(&outcome.as_result());
    ctx.close();

    // Anything still queued sees a closed context: synchronous signals are
    // abandoned, queries are still answered.
    inbox.close();
    while let Ok(command) = inbox.try_recv() {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| apply(&ctx, command))) {
            tracing::warn!(
                workflow_id = %execution.workflow_id,
                error = %PanicError::from_payload(&*panic),
                "command panicked on closed workflow"
            );
        }
    }

    outcome_tx.send_replace(Some(outcome));
}

fn apply(ctx: &WorkflowContext, command: InstanceCommand) {
    match command {
        InstanceCommand::Signal(delivery) => ctx.deliver_signal(delivery),
        InstanceCommand::Query { query_type, respond } => {
            let _ = respond.send(ctx.query(&query_type));
        }
    }
}
