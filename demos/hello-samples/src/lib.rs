//! # Hello samples
//!
//! Sample workflows for the coordinator:
//!
//! - **hello-signal**: a workflow waiting on an ordinary signal
//! - **hello-activity**: a workflow returning an activity's result
//! - **order**: a staged order process cancelled by a synchronous signal,
//!   once with field polling and once through a signal queue
//!
//! ## Running
//!
//! ```bash
//! cargo run -p hello-samples -- signal --name Sally
//! cargo run -p hello-samples -- sync-signal --strategy queue --cancel-at picking
//! cargo run -p hello-samples -- activity --name Sally
//! ```

pub mod activities;
pub mod workflows;

pub use activities::*;
pub use workflows::*;

use cadence_worker::WorkflowHost;

/// Register every sample workflow and activity on `host`.
pub fn register_all(host: &WorkflowHost) {
    host.register_activity(HELLO_ACTIVITY, hello_activity);

    host.register_workflow(HELLO_SIGNAL_WORKFLOW, hello_signal_workflow);
    host.register_workflow(HELLO_ACTIVITY_WORKFLOW, hello_activity_workflow);
    host.register_workflow(ORDER_FIELD_POLLING_WORKFLOW, order_field_polling_workflow);
    host.register_workflow(ORDER_QUEUE_MEDIATED_WORKFLOW, order_queue_mediated_workflow);
}
