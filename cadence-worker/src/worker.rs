//! In-process workflow host.
//!
//! [`WorkflowHost`] owns the workflow and activity registries and the table
//! of instances. Starting a workflow spawns an instance driver task; signals,
//! synchronous signals and queries are routed to the driver's inbox.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cadence_activity::{ActivityContext, ActivityRegistry};
use cadence_core::{
    ActivityError, CadenceError, CadenceResult, Payload, ServerError, SignalArgs, StartWorkflowOptions,
    WorkflowExecution, WorkflowExecutionStatus, WorkflowInfo, WorkflowType,
};
use cadence_workflow::{SignalDelivery, WorkflowContext, WorkflowError, WorkflowHistory};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::executor::instance::{InstanceCommand, InstanceOutcome, InstanceRecord};
use crate::executor::replay::WorkflowReplayer;
use crate::registry::WorkflowRegistry;

/// Worker options for configuration
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Identity reported in logs
    pub identity: String,
    /// Bound for synchronous signals when neither the caller nor the
    /// instance supplies one. `None` waits until reply or abandonment.
    pub default_signal_timeout: Option<Duration>,
    /// Capacity of each signal queue. `None` is unbounded.
    pub max_signal_queue_size: Option<usize>,
    /// Closed instances kept for describe, query and history. The oldest
    /// are dropped first. `None` keeps every closed instance.
    pub max_closed_instances: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            identity: format!(
                "cadence-rust-worker@{}-pid-{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
                std::process::id()
            ),
            default_signal_timeout: Some(Duration::from_secs(60)),
            max_signal_queue_size: None,
            max_closed_instances: Some(10_000),
        }
    }
}

impl WorkerOptions {
    /// Reply bound that still outlasts a polling workflow's slowest stage.
    pub fn development() -> Self {
        Self {
            default_signal_timeout: Some(Duration::from_secs(30)),
            max_closed_instances: Some(1_000),
            ..Default::default()
        }
    }

    /// Bounded queues and a generous reply bound.
    pub fn production() -> Self {
        Self {
            default_signal_timeout: Some(Duration::from_secs(60)),
            max_signal_queue_size: Some(10_000),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }
}

/// Hosts workflow instances in the current tokio runtime
pub struct WorkflowHost {
    options: WorkerOptions,
    workflows: Arc<WorkflowRegistry>,
    activities: Arc<ActivityRegistry>,
    instances: Mutex<HashMap<String, Arc<InstanceRecord>>>,
}

impl WorkflowHost {
    pub fn new(options: WorkerOptions) -> Self {
        tracing::debug!(identity = %options.identity, "workflow host created");
        Self {
            options,
            workflows: Arc::new(WorkflowRegistry::new()),
            activities: Arc::new(ActivityRegistry::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn register_workflow<F, Fut, I, O>(&self, name: &str, workflow: F)
    where
        F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.workflows.register(name, workflow);
    }

    pub fn register_activity<F, Fut, I, O>(&self, name: &str, activity: F)
    where
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.activities.register(name, activity);
    }

    /// Start a new instance. Must be called from within a tokio runtime.
    ///
    /// A caller-supplied id that names a running instance is rejected; the id
    /// of a closed instance may be reused and gets a fresh run id.
    pub fn start_workflow(
        &self,
        options: StartWorkflowOptions,
        workflow_type: &str,
        input: Payload,
    ) -> CadenceResult<WorkflowExecution> {
        let workflow = self.workflows.get(workflow_type).ok_or_else(|| ServerError::BadRequest {
            message: format!("workflow type not registered: {}", workflow_type),
        })?;
        let workflow_id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut instances = self.instances.lock();
        if let Some(limit) = self.options.max_closed_instances {
            evict_closed(&mut instances, limit);
        }
        if let Some(existing) = instances.get(&workflow_id) {
            if !existing.is_closed() {
                return Err(ServerError::WorkflowExecutionAlreadyStarted {
                    message: format!(
                        "workflow {} already running as run {}",
                        workflow_id,
                        existing.execution().run_id
                    ),
                }
                .into());
            }
        }

        let info = WorkflowInfo {
            workflow_execution: WorkflowExecution::new(workflow_id.clone(), Uuid::new_v4().to_string()),
            workflow_type: WorkflowType::new(workflow_type),
            start_time: chrono::Utc::now(),
        };
        let record = InstanceRecord::spawn(
            info,
            workflow,
            input,
            self.activities.clone(),
            self.options.max_signal_queue_size,
            options.signal_reply_timeout,
        );
        let execution = record.execution().clone();
        instances.insert(workflow_id, record);
        Ok(execution)
    }

    /// Fire-and-forget signal.
    pub fn signal_workflow(&self, workflow_id: &str, signal_name: &str, payload: Payload) -> CadenceResult<()> {
        let record = self.instance(workflow_id)?;
        let delivery = SignalDelivery::fire_and_forget(signal_name, payload);
        if record.is_closed() || record.send(InstanceCommand::Signal(delivery)).is_err() {
            return Err(already_completed(workflow_id));
        }
        tracing::debug!(workflow_id, signal_name, "signal sent");
        Ok(())
    }

    /// Send a synchronous signal and wait for the workflow's reply.
    ///
    /// A `None` timeout falls back to the instance's reply timeout, then to
    /// [`WorkerOptions::default_signal_timeout`].
    pub async fn signal_workflow_sync(
        &self,
        workflow_id: &str,
        signal_name: &str,
        args: SignalArgs,
        timeout: Option<Duration>,
    ) -> CadenceResult<Payload> {
        let record = self.instance(workflow_id)?;
        let timeout = timeout
            .or(record.signal_reply_timeout())
            .or(self.options.default_signal_timeout);

        let pending = record.gateway().submit(signal_name);
        let request_id = pending.request_id();
        tracing::debug!(workflow_id, signal_name, %request_id, ?timeout, "synchronous signal sent");

        let delivery = SignalDelivery::synchronous(signal_name, &args, request_id)?;
        if record.send(InstanceCommand::Signal(delivery)).is_err() {
            record.gateway().abandon(request_id);
        }
        Ok(pending.wait(timeout).await?)
    }

    /// Run a query handler. Queries on a running instance are applied
    /// between polls of the workflow.
    pub async fn query_workflow(&self, workflow_id: &str, query_type: &str) -> CadenceResult<Payload> {
        let record = self.instance(workflow_id)?;
        let (respond, response) = oneshot::channel();
        let command = InstanceCommand::Query {
            query_type: query_type.to_string(),
            respond,
        };
        if record.send(command).is_err() {
            return record.query_closed(query_type);
        }
        match response.await {
            Ok(result) => result,
            Err(_) => record.query_closed(query_type),
        }
    }

    /// Wait for the instance to close and return its result.
    pub async fn await_result(&self, workflow_id: &str) -> CadenceResult<Payload> {
        let record = self.instance(workflow_id)?;
        match record.wait_outcome().await {
            InstanceOutcome::Completed(value) => Ok(value),
            InstanceOutcome::Failed(reason) => Err(CadenceError::WorkflowExecutionFailed(reason)),
        }
    }

    pub fn describe(&self, workflow_id: &str) -> CadenceResult<WorkflowExecutionStatus> {
        Ok(self.instance(workflow_id)?.status())
    }

    /// History recorded so far for the latest run of `workflow_id`.
    pub fn history(&self, workflow_id: &str) -> CadenceResult<WorkflowHistory> {
        Ok(self.instance(workflow_id)?.history())
    }

    /// Replayer over this host's workflow registry.
    pub fn replayer(&self) -> WorkflowReplayer {
        WorkflowReplayer::new(self.workflows.clone())
    }

    fn instance(&self, workflow_id: &str) -> CadenceResult<Arc<InstanceRecord>> {
        self.instances
            .lock()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| {
                ServerError::EntityNotExists {
                    message: format!("workflow {} not found", workflow_id),
                }
                .into()
            })
    }
}

/// Drop the oldest closed instances until at most `limit` remain.
fn evict_closed(instances: &mut HashMap<String, Arc<InstanceRecord>>, limit: usize) {
    let mut closed: Vec<_> = instances
        .iter()
        .filter(|(_, record)| record.is_closed())
        .map(|(workflow_id, record)| (record.start_time(), workflow_id.clone()))
        .collect();
    if closed.len() <= limit {
        return;
    }
    closed.sort();
    let excess = closed.len() - limit;
    for (_, workflow_id) in closed.into_iter().take(excess) {
        instances.remove(&workflow_id);
    }
    tracing::debug!(evicted = excess, limit, "dropped closed instances");
}

fn already_completed(workflow_id: &str) -> CadenceError {
    ServerError::WorkflowExecutionAlreadyCompleted {
        message: format!("workflow {} already completed", workflow_id),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_workflow::SignalRequest;
    use serde_json::json;

    fn host() -> WorkflowHost {
        let host = WorkflowHost::new(WorkerOptions::development().with_identity("test"));
        host.register_workflow("echo", |ctx: WorkflowContext, _: ()| async move {
            let queue = ctx.new_queue::<Payload>("in");
            let value = queue.dequeue(&ctx, None).await?;
            Ok::<_, WorkflowError>(value)
        });
        host.register_workflow("approve", |ctx: WorkflowContext, _: ()| async move {
            let queue = ctx.new_queue::<SignalRequest<String>>("approve");
            let request = queue.dequeue(&ctx, None).await?;
            let who: Option<String> = request.arg("who")?;
            request.reply(&ctx, format!("approved by {}", who.unwrap_or_default()))?;
            Ok::<_, WorkflowError>(true)
        });
        host.register_workflow("ignore", |ctx: WorkflowContext, _: ()| async move {
            ctx.sleep(Duration::from_secs(30)).await?;
            Ok::<_, WorkflowError>(())
        });
        host
    }

    #[tokio::test]
    async fn test_start_signal_and_result() {
        let host = host();
        let execution = host
            .start_workflow(StartWorkflowOptions::default(), "echo", json!(null))
            .unwrap();
        assert_eq!(host.describe(&execution.workflow_id).unwrap(), WorkflowExecutionStatus::Running);

        host.signal_workflow(&execution.workflow_id, "in", json!(42)).unwrap();
        assert_eq!(host.await_result(&execution.workflow_id).await.unwrap(), json!(42));
        assert_eq!(host.describe(&execution.workflow_id).unwrap(), WorkflowExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_while_running_and_reusable_after() {
        let host = host();
        let first = host
            .start_workflow(StartWorkflowOptions::with_id("dup"), "echo", json!(null))
            .unwrap();
        let err = host
            .start_workflow(StartWorkflowOptions::with_id("dup"), "echo", json!(null))
            .unwrap_err();
        assert!(err.is_already_started());

        host.signal_workflow("dup", "in", json!(1)).unwrap();
        host.await_result("dup").await.unwrap();

        let second = host
            .start_workflow(StartWorkflowOptions::with_id("dup"), "echo", json!(null))
            .unwrap();
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_unknown_type_and_instance() {
        let host = host();
        assert!(matches!(
            host.start_workflow(StartWorkflowOptions::default(), "nope", json!(null)),
            Err(CadenceError::Server(ServerError::BadRequest { .. }))
        ));
        assert!(matches!(
            host.describe("missing"),
            Err(CadenceError::Server(ServerError::EntityNotExists { .. }))
        ));
    }

    #[tokio::test]
    async fn test_signal_after_completion_is_rejected() {
        let host = host();
        host.start_workflow(StartWorkflowOptions::with_id("done"), "echo", json!(null))
            .unwrap();
        host.signal_workflow("done", "in", json!(1)).unwrap();
        host.await_result("done").await.unwrap();

        assert!(matches!(
            host.signal_workflow("done", "in", json!(2)),
            Err(CadenceError::Server(ServerError::WorkflowExecutionAlreadyCompleted { .. }))
        ));
        let err = host
            .signal_workflow_sync("done", "in", SignalArgs::new(), None)
            .await
            .unwrap_err();
        assert!(err.is_signal_abandoned());
    }

    #[tokio::test]
    async fn test_sync_signal_receives_reply() {
        let host = host();
        host.start_workflow(StartWorkflowOptions::with_id("approve-1"), "approve", json!(null))
            .unwrap();

        let args = SignalArgs::new().with("who", &"ops").unwrap();
        let reply = host
            .signal_workflow_sync("approve-1", "approve", args, None)
            .await
            .unwrap();
        assert_eq!(reply, json!("approved by ops"));
        assert_eq!(host.await_result("approve-1").await.unwrap(), json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_signal_timeout_then_abandon() {
        let host = host();
        host.start_workflow(StartWorkflowOptions::with_id("ignore-1"), "ignore", json!(null))
            .unwrap();

        let err = host
            .signal_workflow_sync("ignore-1", "cancel", SignalArgs::new(), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(err.is_signal_timeout());

        // still pending when the instance closes
        let waiting = host.signal_workflow_sync("ignore-1", "cancel", SignalArgs::new(), Some(Duration::from_secs(60)));
        let (reply, result) = tokio::join!(waiting, host.await_result("ignore-1"));
        assert!(reply.unwrap_err().is_signal_abandoned());
        assert_eq!(result.unwrap(), json!(null));
    }

    #[tokio::test]
    async fn test_query_unknown_type_fails() {
        let host = host();
        host.start_workflow(StartWorkflowOptions::with_id("q"), "echo", json!(null))
            .unwrap();
        assert!(matches!(
            host.query_workflow("q", "status").await,
            Err(CadenceError::Server(ServerError::QueryFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_oldest_closed_instances_are_dropped() {
        let options = WorkerOptions {
            max_closed_instances: Some(1),
            ..WorkerOptions::development()
        };
        let host = WorkflowHost::new(options);
        host.register_workflow("quick", |_ctx: WorkflowContext, _: ()| async {
            Ok::<_, WorkflowError>("done")
        });
        host.register_workflow("echo", |ctx: WorkflowContext, _: ()| async move {
            let queue = ctx.new_queue::<Payload>("in");
            let value = queue.dequeue(&ctx, None).await?;
            Ok::<_, WorkflowError>(value)
        });

        host.start_workflow(StartWorkflowOptions::with_id("running"), "echo", json!(null))
            .unwrap();
        for workflow_id in ["a", "b", "c"] {
            host.start_workflow(StartWorkflowOptions::with_id(workflow_id), "quick", json!(null))
                .unwrap();
            host.await_result(workflow_id).await.unwrap();
        }

        assert!(matches!(
            host.describe("a"),
            Err(CadenceError::Server(ServerError::EntityNotExists { .. }))
        ));
        assert_eq!(host.describe("b").unwrap(), WorkflowExecutionStatus::Completed);
        assert_eq!(host.describe("c").unwrap(), WorkflowExecutionStatus::Completed);
        assert_eq!(host.describe("running").unwrap(), WorkflowExecutionStatus::Running);
    }

    #[test]
    fn test_option_profiles() {
        assert_eq!(WorkerOptions::default().default_signal_timeout, Some(Duration::from_secs(60)));
        assert_eq!(WorkerOptions::development().default_signal_timeout, Some(Duration::from_secs(30)));
        assert_eq!(WorkerOptions::production().max_signal_queue_size, Some(10_000));
    }
}
