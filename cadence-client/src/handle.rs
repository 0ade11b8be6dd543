//! Typed handle to one workflow execution.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{
    from_payload, to_payload, CadenceResult, SignalArgs, StartWorkflowOptions, WorkflowExecution,
    WorkflowExecutionStatus,
};
use cadence_workflow::WorkflowHistory;
use serde::{de::DeserializeOwned, Serialize};

use crate::client::Client;

/// Handle used by callers outside the workflow.
///
/// Payloads are encoded and decoded here so callers work with their own types.
#[derive(Clone)]
pub struct WorkflowHandle {
    client: Arc<dyn Client>,
    execution: WorkflowExecution,
}

impl std::fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHandle")
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

impl WorkflowHandle {
    /// Start a workflow and return its handle.
    pub async fn start<I: Serialize>(
        client: Arc<dyn Client>,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: &I,
    ) -> CadenceResult<Self> {
        let execution = client
            .start_workflow(options, workflow_type, to_payload(input)?)
            .await?;
        Ok(Self { client, execution })
    }

    /// Handle to an execution started elsewhere.
    pub fn new(client: Arc<dyn Client>, execution: WorkflowExecution) -> Self {
        Self { client, execution }
    }

    pub fn execution(&self) -> &WorkflowExecution {
        &self.execution
    }

    pub fn workflow_id(&self) -> &str {
        &self.execution.workflow_id
    }

    pub async fn signal<T: Serialize>(&self, signal_name: &str, value: &T) -> CadenceResult<()> {
        self.client
            .signal_workflow(self.workflow_id(), signal_name, to_payload(value)?)
            .await
    }

    /// Send a synchronous signal and decode the reply.
    ///
    /// Fails with a signal timeout if no reply arrives within `timeout`, or
    /// with a signal abandoned error if the workflow closes first.
    pub async fn signal_sync<R: DeserializeOwned>(
        &self,
        signal_name: &str,
        args: SignalArgs,
        timeout: Option<Duration>,
    ) -> CadenceResult<R> {
        let reply = self
            .client
            .signal_workflow_sync(self.workflow_id(), signal_name, args, timeout)
            .await?;
        Ok(from_payload(reply)?)
    }

    pub async fn query<R: DeserializeOwned>(&self, query_type: &str) -> CadenceResult<R> {
        let value = self.client.query_workflow(self.workflow_id(), query_type).await?;
        Ok(from_payload(value)?)
    }

    /// Wait for the workflow to close and decode its result.
    pub async fn get_result<O: DeserializeOwned>(&self) -> CadenceResult<O> {
        let value = self.client.get_workflow_result(self.workflow_id()).await?;
        Ok(from_payload(value)?)
    }

    pub async fn describe(&self) -> CadenceResult<WorkflowExecutionStatus> {
        self.client.describe_workflow_execution(self.workflow_id()).await
    }

    pub async fn history(&self) -> CadenceResult<WorkflowHistory> {
        self.client.get_workflow_history(self.workflow_id()).await
    }
}
