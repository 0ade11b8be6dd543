//! Workflow registry.
//!
//! Maps workflow type names to type-erased workflow functions. Activities
//! live in [`cadence_activity::ActivityRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use cadence_core::{from_payload, to_payload, Payload};
use cadence_workflow::{WorkflowContext, WorkflowError};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

/// Type-erased workflow entry point
pub type WorkflowFn =
    Arc<dyn Fn(WorkflowContext, Payload) -> BoxFuture<'static, Result<Payload, WorkflowError>> + Send + Sync>;

/// Workflows registered by type name
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<String, WorkflowFn>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow function under `name`.
    ///
    /// # Example
    /// ```ignore
    /// registry.register("hello-signal", |ctx: WorkflowContext, _: ()| async move {
    ///     let queue = ctx.new_queue::<String>("signal");
    ///     let name = queue.dequeue(&ctx, None).await?;
    ///     Ok(format!("Hello {}!", name))
    /// });
    /// ```
    pub fn register<F, Fut, I, O>(&self, name: &str, workflow: F)
    where
        F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, WorkflowError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let boxed: WorkflowFn = Arc::new(move |ctx: WorkflowContext, input: Payload| {
            let input: I = match from_payload(input) {
                Ok(input) => input,
                Err(err) => return Box::pin(async move { Err(err.into()) }) as BoxFuture<'static, _>,
            };
            let future = workflow(ctx, input);
            Box::pin(async move {
                let output = future.await?;
                Ok(to_payload(&output)?)
            })
        });

        if self.workflows.write().insert(name.to_string(), boxed).is_some() {
            tracing::warn!(workflow_type = name, "workflow re-registered, replacing previous implementation");
        }
    }

    pub fn get(&self, name: &str) -> Option<WorkflowFn> {
        self.workflows.read().get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.workflows.read().contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.read().keys().cloned().collect();
        names.sort();
        names
    }
}
