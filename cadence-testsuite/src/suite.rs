//! Testing framework for workflows and activities.
//!
//! [`TestWorkflowEnvironment`] runs a real in-process host. Combined with
//! `#[tokio::test(start_paused = true)]`, durable sleeps and dequeue
//! timeouts advance virtual time, so multi-second workflows finish instantly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cadence_activity::ActivityContext;
use cadence_client::{Client, ClientOptions, WorkflowClient, WorkflowHandle};
use cadence_core::{
    ActivityError, CadenceError, CadenceResult, Payload, ServerError, StartWorkflowOptions,
};
use cadence_worker::{ReplayError, WorkerOptions, WorkflowHost};
use cadence_workflow::{WorkflowContext, WorkflowError, WorkflowHistory};
use serde::{de::DeserializeOwned, Serialize};

/// Interval between polls in [`TestWorkflowEnvironment::wait_for_query`].
pub const QUERY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Test workflow environment for running workflow tests
pub struct TestWorkflowEnvironment {
    host: Arc<WorkflowHost>,
    client: Arc<dyn Client>,
}

impl TestWorkflowEnvironment {
    /// Create a new test workflow environment
    pub fn new() -> Self {
        Self::with_options(WorkerOptions::development().with_identity("test-environment"))
    }

    pub fn with_options(options: WorkerOptions) -> Self {
        let host = Arc::new(WorkflowHost::new(options));
        let client: Arc<dyn Client> = Arc::new(WorkflowClient::new(
            host.clone(),
            ClientOptions::with_identity("test-client"),
        ));
        Self { host, client }
    }

    pub fn host(&self) -> &Arc<WorkflowHost> {
        &self.host
    }

    pub fn client(&self) -> Arc<dyn Client> {
        self.client.clone()
    }

    /// Register a workflow for testing
    ///
    /// # Example
    /// ```ignore
    /// use cadence_testsuite::TestWorkflowEnvironment;
    ///
    /// let env = TestWorkflowEnvironment::new();
    /// env.register_workflow("my_workflow", |_ctx, input: String| async move {
    ///     Ok::<_, WorkflowError>(format!("Hello, {}!", input))
    /// });
    /// ```
    pub fn register_workflow<F, Fut, I, O>(&self, name: &str, workflow: F)
    where
        F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.host.register_workflow(name, workflow);
    }

    pub fn register_activity<F, Fut, I, O>(&self, name: &str, activity: F)
    where
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.host.register_activity(name, activity);
    }

    /// Start a workflow under a fresh test id.
    pub async fn start_workflow<I: Serialize>(&self, workflow_type: &str, input: &I) -> CadenceResult<WorkflowHandle> {
        let id = format!("test-workflow-{}", uuid::Uuid::new_v4());
        self.start_workflow_with_id(&id, workflow_type, input).await
    }

    pub async fn start_workflow_with_id<I: Serialize>(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: &I,
    ) -> CadenceResult<WorkflowHandle> {
        WorkflowHandle::start(
            self.client(),
            StartWorkflowOptions::with_id(workflow_id),
            workflow_type,
            input,
        )
        .await
    }

    /// Start a workflow and wait for its result.
    pub async fn execute_workflow<I, O>(&self, workflow_type: &str, input: &I) -> CadenceResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.start_workflow(workflow_type, input).await?.get_result().await
    }

    /// Poll a query until its value satisfies `predicate`.
    ///
    /// A query type the workflow has not registered yet counts as not ready.
    /// Fails if the workflow closes first.
    pub async fn wait_for_query<R, P>(&self, handle: &WorkflowHandle, query_type: &str, predicate: P) -> CadenceResult<R>
    where
        R: DeserializeOwned,
        P: Fn(&R) -> bool,
    {
        loop {
            match handle.query::<R>(query_type).await {
                Ok(value) if predicate(&value) => return Ok(value),
                Ok(_) | Err(CadenceError::Server(ServerError::QueryFailed { .. })) => {}
                Err(err) => return Err(err),
            }
            if handle.describe().await?.is_closed() {
                return Err(CadenceError::Other(format!(
                    "workflow {} closed before query {} matched",
                    handle.workflow_id(),
                    query_type
                )));
            }
            tokio::time::sleep(QUERY_POLL_INTERVAL).await;
        }
    }

    /// Replay a recorded history against the registered workflows.
    pub async fn replay(&self, history: &WorkflowHistory) -> Result<Result<Payload, String>, ReplayError> {
        self.host.replayer().replay_workflow_history(history).await
    }
}

impl Default for TestWorkflowEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test-friendly tracing subscriber. Safe to call from every test.
///
/// Filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
