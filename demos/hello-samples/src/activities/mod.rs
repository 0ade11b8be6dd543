//! Sample activities.

use cadence_activity::ActivityContext;
use cadence_core::ActivityError;

pub const HELLO_ACTIVITY: &str = "hello";

/// Build a greeting.
pub async fn hello_activity(ctx: ActivityContext, name: String) -> Result<String, ActivityError> {
    tracing::info!(activity_id = %ctx.activity_info().activity_id, %name, "greeting");
    Ok(format!("Hello {}!", name))
}
