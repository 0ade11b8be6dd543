//! Client implementation for the workflow coordinator.
//!
//! [`Client`] is the operation surface external callers use. [`WorkflowClient`]
//! implements it against an in-process [`WorkflowHost`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::{CadenceResult, Payload, SignalArgs, StartWorkflowOptions, WorkflowExecution, WorkflowExecutionStatus};
use cadence_worker::WorkflowHost;
use cadence_workflow::WorkflowHistory;

use crate::options::ClientOptions;

/// Client trait for workflow operations
#[async_trait]
pub trait Client: Send + Sync {
    /// Start a workflow execution
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: Payload,
    ) -> CadenceResult<WorkflowExecution>;

    /// Send a fire-and-forget signal
    async fn signal_workflow(&self, workflow_id: &str, signal_name: &str, payload: Payload) -> CadenceResult<()>;

    /// Send a synchronous signal and wait for the workflow's reply
    async fn signal_workflow_sync(
        &self,
        workflow_id: &str,
        signal_name: &str,
        args: SignalArgs,
        timeout: Option<Duration>,
    ) -> CadenceResult<Payload>;

    /// Query workflow state
    async fn query_workflow(&self, workflow_id: &str, query_type: &str) -> CadenceResult<Payload>;

    /// Wait for the workflow to close and return its result
    async fn get_workflow_result(&self, workflow_id: &str) -> CadenceResult<Payload>;

    async fn describe_workflow_execution(&self, workflow_id: &str) -> CadenceResult<WorkflowExecutionStatus>;

    async fn get_workflow_history(&self, workflow_id: &str) -> CadenceResult<WorkflowHistory>;
}

/// Client bound to an in-process workflow host
#[derive(Clone)]
pub struct WorkflowClient {
    host: Arc<WorkflowHost>,
    options: ClientOptions,
}

impl WorkflowClient {
    pub fn new(host: Arc<WorkflowHost>, options: ClientOptions) -> Self {
        Self { host, options }
    }

    pub fn host(&self) -> &Arc<WorkflowHost> {
        &self.host
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}

#[async_trait]
impl Client for WorkflowClient {
    async fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: Payload,
    ) -> CadenceResult<WorkflowExecution> {
        let execution = self.host.start_workflow(options, workflow_type, input)?;
        tracing::info!(
            identity = %self.options.identity,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            workflow_type,
            "started workflow"
        );
        Ok(execution)
    }

    async fn signal_workflow(&self, workflow_id: &str, signal_name: &str, payload: Payload) -> CadenceResult<()> {
        self.host.signal_workflow(workflow_id, signal_name, payload)
    }

    async fn signal_workflow_sync(
        &self,
        workflow_id: &str,
        signal_name: &str,
        args: SignalArgs,
        timeout: Option<Duration>,
    ) -> CadenceResult<Payload> {
        let result = self
            .host
            .signal_workflow_sync(workflow_id, signal_name, args, timeout)
            .await;
        if let Err(err) = &result {
            tracing::warn!(identity = %self.options.identity, workflow_id, signal_name, error = %err, "synchronous signal failed");
        }
        result
    }

    async fn query_workflow(&self, workflow_id: &str, query_type: &str) -> CadenceResult<Payload> {
        self.host.query_workflow(workflow_id, query_type).await
    }

    async fn get_workflow_result(&self, workflow_id: &str) -> CadenceResult<Payload> {
        self.host.await_result(workflow_id).await
    }

    async fn describe_workflow_execution(&self, workflow_id: &str) -> CadenceResult<WorkflowExecutionStatus> {
        self.host.describe(workflow_id)
    }

    async fn get_workflow_history(&self, workflow_id: &str) -> CadenceResult<WorkflowHistory> {
        self.host.history(workflow_id)
    }
}
