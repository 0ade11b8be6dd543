//! Workflow handle integration tests.
//!
//! Each test runs a host in-process and drives it only through
//! [`WorkflowHandle`], the way an external caller would.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_activity::ActivityContext;
use cadence_client::{Client, ClientOptions, WorkflowClient, WorkflowHandle};
use cadence_core::{ActivityError, CadenceError, SignalArgs, StartWorkflowOptions, WorkflowExecutionStatus};
use cadence_worker::{WorkerOptions, WorkflowHost};
use cadence_workflow::{SignalRequest, WorkflowContext, WorkflowError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeting {
    salutation: String,
}

fn client() -> Arc<dyn Client> {
    let host = Arc::new(WorkflowHost::new(WorkerOptions::development()));

    host.register_workflow("greeter", |ctx: WorkflowContext, greeting: Greeting| async move {
        let names = ctx.new_queue::<String>("name");
        let name = names.dequeue(&ctx, None).await?;
        Ok::<_, WorkflowError>(format!("{} {}!", greeting.salutation, name))
    });

    host.register_workflow("counter", |ctx: WorkflowContext, _: ()| async move {
        let count = Arc::new(Counter::default());
        let handler_count = count.clone();
        ctx.set_signal_handler("increment", move |by: u32| handler_count.add(by));
        let query_count = count.clone();
        ctx.set_query_handler("count", move || query_count.get());

        let stop = ctx.new_queue::<SignalRequest<u32>>("stop");
        let request = stop.dequeue(&ctx, None).await?;
        request.reply(&ctx, count.get())?;
        Ok::<_, WorkflowError>(count.get())
    });

    host.register_activity("lookup", |_ctx: ActivityContext, key: String| async move {
        if key == "missing" {
            Err(ActivityError::failed("lookup", "no such key"))
        } else {
            Ok(key.to_uppercase())
        }
    });
    host.register_workflow("lookup-with-fallback", |ctx: WorkflowContext, key: String| async move {
        match ctx.execute_activity::<_, String>("lookup", &key).await {
            Ok(value) => Ok(value),
            Err(WorkflowError::Activity(err)) => Ok(format!("default ({})", err.activity_type())),
            Err(err) => Err(err),
        }
    });

    Arc::new(WorkflowClient::new(host, ClientOptions::with_identity("handle-tests")))
}

/// Counter shared between handlers and workflow code.
#[derive(Default)]
struct Counter(AtomicU32);

impl Counter {
    fn add(&self, by: u32) -> u32 {
        self.0.fetch_add(by, Ordering::SeqCst) + by
    }

    fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_typed_start_signal_and_result() {
    let client = client();
    let greeting = Greeting {
        salutation: "Hello".to_string(),
    };
    let handle = WorkflowHandle::start(client, StartWorkflowOptions::default(), "greeter", &greeting)
        .await
        .unwrap();

    handle.signal("name", &"Sally").await.unwrap();
    let result: String = handle.get_result().await.unwrap();
    assert_eq!(result, "Hello Sally!");
    assert_eq!(handle.describe().await.unwrap(), WorkflowExecutionStatus::Completed);
}

#[tokio::test]
async fn test_handlers_queries_and_sync_reply() {
    let client = client();
    let handle = WorkflowHandle::start(client, StartWorkflowOptions::with_id("counter-1"), "counter", &())
        .await
        .unwrap();

    handle.signal("increment", &2u32).await.unwrap();
    handle.signal("increment", &3u32).await.unwrap();
    let count: u32 = handle.query("count").await.unwrap();
    assert_eq!(count, 5);

    let at_stop: u32 = handle.signal_sync("stop", SignalArgs::new(), None).await.unwrap();
    assert_eq!(at_stop, 5);
    assert_eq!(handle.get_result::<u32>().await.unwrap(), 5);

    // queries still work on a closed instance
    assert_eq!(handle.query::<u32>("count").await.unwrap(), 5);
}

#[tokio::test]
async fn test_activity_failure_is_recoverable() {
    let client = client();
    let found = WorkflowHandle::start(client.clone(), StartWorkflowOptions::default(), "lookup-with-fallback", &"key")
        .await
        .unwrap();
    assert_eq!(found.get_result::<String>().await.unwrap(), "KEY");

    let missing = WorkflowHandle::start(client, StartWorkflowOptions::default(), "lookup-with-fallback", &"missing")
        .await
        .unwrap();
    assert_eq!(missing.get_result::<String>().await.unwrap(), "default (lookup)");
}

#[tokio::test(start_paused = true)]
async fn test_sync_signal_timeout_and_abandon_are_distinct() {
    let client = client();
    let handle = WorkflowHandle::start(client, StartWorkflowOptions::default(), "greeter", &Greeting {
        salutation: "Hi".to_string(),
    })
    .await
    .unwrap();

    // nobody ever replies to "poke"
    let err = handle
        .signal_sync::<bool>("poke", SignalArgs::new(), Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    assert!(err.is_signal_timeout());
    assert!(!err.is_signal_abandoned());

    let (poke, done) = tokio::join!(
        handle.signal_sync::<bool>("poke", SignalArgs::new(), Some(Duration::from_secs(60))),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.signal("name", &"Bob").await.unwrap();
            handle.get_result::<String>().await
        }
    );
    let err = poke.unwrap_err();
    assert!(err.is_signal_abandoned(), "{:?}", err);
    assert_eq!(done.unwrap(), "Hi Bob!");
}

#[tokio::test]
async fn test_failed_workflow_surfaces_reason() {
    let host = Arc::new(WorkflowHost::new(WorkerOptions::default()));
    host.register_workflow("fails", |_ctx: WorkflowContext, _: ()| async move {
        Err::<(), _>(WorkflowError::Generic("bad input".to_string()))
    });
    let client: Arc<dyn Client> = Arc::new(WorkflowClient::new(host, ClientOptions::default()));

    let handle = WorkflowHandle::start(client, StartWorkflowOptions::default(), "fails", &())
        .await
        .unwrap();
    match handle.get_result::<()>().await {
        Err(CadenceError::WorkflowExecutionFailed(reason)) => assert!(reason.contains("bad input")),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(handle.describe().await.unwrap(), WorkflowExecutionStatus::Failed);
}
