//! Hello workflows: an ordinary signal and an activity call.

use cadence_workflow::{WorkflowContext, WorkflowError};

use crate::activities::HELLO_ACTIVITY;

pub const HELLO_SIGNAL_WORKFLOW: &str = "hello-signal";
pub const HELLO_ACTIVITY_WORKFLOW: &str = "hello-activity";

/// Signal carrying the name to greet.
pub const NAME_SIGNAL: &str = "signal";

/// Wait for one name on [`NAME_SIGNAL`] and greet it.
pub async fn hello_signal_workflow(ctx: WorkflowContext, _: ()) -> Result<String, WorkflowError> {
    let names = ctx.new_queue::<String>(NAME_SIGNAL);
    let name = names.dequeue(&ctx, None).await?;
    Ok(format!("Hello {}!", name))
}

/// Greet `name` through the hello activity.
pub async fn hello_activity_workflow(ctx: WorkflowContext, name: String) -> Result<String, WorkflowError> {
    ctx.execute_activity(HELLO_ACTIVITY, &name).await
}
