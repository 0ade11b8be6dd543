//! Activity invocation.
//!
//! Workflow logic never runs activities itself; it hands them to an
//! [`ActivityInvoker`] and awaits the outcome. [`ActivityRegistry`] is the
//! in-process invoker used by the host and the test environment.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::{from_payload, to_payload, ActivityError, Payload};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};

use crate::context::ActivityContext;

/// Issues activity calls on behalf of workflow logic.
///
/// Failures are reported back unchanged; retries are not this trait's concern.
#[async_trait]
pub trait ActivityInvoker: Send + Sync {
    async fn invoke(&self, ctx: ActivityContext, input: Payload) -> Result<Payload, ActivityError>;
}

type ActivityFn =
    Arc<dyn Fn(ActivityContext, Payload) -> BoxFuture<'static, Result<Payload, ActivityError>> + Send + Sync>;

/// Activities registered by name.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: RwLock<HashMap<String, ActivityFn>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity implementation.
    ///
    /// # Example
    /// ```ignore
    /// registry.register("greet", |_ctx, name: String| async move {
    ///     Ok(format!("Hello {}!", name))
    /// });
    /// ```
    pub fn register<F, Fut, I, O>(&self, name: &str, activity: F)
    where
        F: Fn(ActivityContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ActivityError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let activity_type = name.to_string();
        let boxed: ActivityFn = Arc::new(move |ctx: ActivityContext, input: Payload| {
            let activity_type = activity_type.clone();
            let input: I = match from_payload(input) {
                Ok(i) => i,
                Err(source) => {
                    return Box::pin(async move {
                        Err(ActivityError::Encoding {
                            activity_type,
                            source,
                        })
                    }) as BoxFuture<'static, _>
                }
            };

            let future = activity(ctx, input);
            Box::pin(async move {
                let output = future.await?;
                to_payload(&output).map_err(|source| ActivityError::Encoding {
                    activity_type,
                    source,
                })
            })
        });

        if self
            .activities
            .write()
            .insert(name.to_string(), boxed)
            .is_some()
        {
            tracing::warn!(activity_type = name, "activity re-registered, replacing previous implementation");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.activities.read().contains_key(name)
    }
}

#[async_trait]
impl ActivityInvoker for ActivityRegistry {
    async fn invoke(&self, ctx: ActivityContext, input: Payload) -> Result<Payload, ActivityError> {
        let activity_type = ctx.activity_info().activity_type.clone();
        let activity = self
            .activities
            .read()
            .get(&activity_type)
            .cloned()
            .ok_or_else(|| ActivityError::NotRegistered(activity_type.clone()))?;

        tracing::debug!(
            activity_type = %activity_type,
            activity_id = %ctx.activity_info().activity_id,
            "invoking activity"
        );
        activity(ctx, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityInfo;
    use cadence_core::WorkflowExecution;

    fn ctx(activity_type: &str) -> ActivityContext {
        ActivityContext::new(ActivityInfo {
            activity_id: "1".into(),
            activity_type: activity_type.into(),
            workflow_execution: WorkflowExecution::new("wf", "run"),
            attempt: 1,
        })
    }

    #[tokio::test]
    async fn test_invoke_registered_activity() {
        let registry = ActivityRegistry::new();
        registry.register("greet", |_ctx, name: String| async move {
            Ok(format!("Hello {}!", name))
        });

        let out = registry
            .invoke(ctx("greet"), serde_json::json!("World"))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("Hello World!"));
    }

    #[tokio::test]
    async fn test_invoke_unknown_activity() {
        let registry = ActivityRegistry::new();
        let err = registry
            .invoke(ctx("missing"), Payload::Null)
            .await
            .unwrap_err();
        assert_eq!(err, ActivityError::NotRegistered("missing".into()));
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_retried() {
        let registry = ActivityRegistry::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        registry.register("flaky", move |_ctx, _: ()| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<(), _>(ActivityError::failed("flaky", "boom"))
            }
        });

        let err = registry.invoke(ctx("flaky"), Payload::Null).await.unwrap_err();
        assert!(matches!(err, ActivityError::Failed { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_input_is_encoding_failure() {
        let registry = ActivityRegistry::new();
        registry.register("double", |_ctx, n: i64| async move { Ok(n * 2) });
        let err = registry
            .invoke(ctx("double"), serde_json::json!("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Encoding { .. }));
    }
}
