//! Order processing with synchronous cancellation.
//!
//! An order moves through `Pending -> Picking -> Packing -> Shipped`. A
//! caller may ask to cancel it with a synchronous `cancel` signal, and is
//! told whether the request was accepted. Once the order reaches
//! `Shipped` it can no longer be cancelled.
//!
//! Both workflows below behave the same from the outside. They differ only
//! in how the request reaches the state machine.

use std::time::Duration;

use cadence_workflow::{
    CancellationDetector, FieldPolling, QueueMediated, StagedCoordinator, StagedProcess, TransitionError,
    WorkflowContext, WorkflowError,
};
use serde::{Deserialize, Serialize};

pub const ORDER_FIELD_POLLING_WORKFLOW: &str = "order-field-polling";
pub const ORDER_QUEUE_MEDIATED_WORKFLOW: &str = "order-queue-mediated";

/// Synchronous signal requesting cancellation. Replies with a `bool`.
pub const CANCEL_SIGNAL: &str = "cancel";

/// Query returning the current [`OrderStatus`].
pub const STATUS_QUERY: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum OrderStatus {
    Pending,
    Picking,
    Packing,
    Shipped,
    #[value(skip)]
    Cancelled,
}

/// The order state machine, starting at `Pending`.
pub fn order_process() -> Result<StagedProcess<OrderStatus>, TransitionError> {
    StagedProcess::new(
        vec![
            OrderStatus::Pending,
            OrderStatus::Picking,
            OrderStatus::Packing,
            OrderStatus::Shipped,
        ],
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    )
}

/// Workflow input: how long each stage takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettings {
    pub picking_secs: u64,
    pub packing_secs: u64,
    pub shipping_secs: u64,
    /// How long the queue-mediated workflow waits for a request after each stage.
    pub poll_timeout_ms: u64,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            picking_secs: 10,
            packing_secs: 10,
            shipping_secs: 5,
            poll_timeout_ms: 1_000,
        }
    }
}

impl OrderSettings {
    pub fn stage_duration(&self, stage: OrderStatus) -> Duration {
        match stage {
            OrderStatus::Picking => Duration::from_secs(self.picking_secs),
            OrderStatus::Packing => Duration::from_secs(self.packing_secs),
            OrderStatus::Shipped => Duration::from_secs(self.shipping_secs),
            OrderStatus::Pending | OrderStatus::Cancelled => Duration::ZERO,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Reply bound for a cancel request sent at any stage. A queued request
    /// is only answered once the current stage ends, so this outlasts the
    /// longest stage plus one poll.
    pub fn cancel_reply_timeout(&self) -> Duration {
        let longest = [OrderStatus::Picking, OrderStatus::Packing, OrderStatus::Shipped]
            .into_iter()
            .map(|stage| self.stage_duration(stage))
            .max()
            .unwrap_or_default();
        longest + self.poll_timeout() + CANCEL_REPLY_SLACK
    }
}

const CANCEL_REPLY_SLACK: Duration = Duration::from_secs(5);

/// Order whose cancel handler flips the status directly.
///
/// Returns `true` if the order shipped, `false` if it was cancelled.
pub async fn order_field_polling_workflow(ctx: WorkflowContext, settings: OrderSettings) -> Result<bool, WorkflowError> {
    let coordinator = StagedCoordinator::new(order_process()?, FieldPolling::new(CANCEL_SIGNAL));
    run_order(&ctx, &settings, coordinator).await
}

/// Order that takes cancel requests off a queue between stages.
///
/// Returns `true` if the order shipped, `false` if it was cancelled.
pub async fn order_queue_mediated_workflow(ctx: WorkflowContext, settings: OrderSettings) -> Result<bool, WorkflowError> {
    let detector = QueueMediated::new(CANCEL_SIGNAL).with_poll_timeout(settings.poll_timeout());
    let coordinator = StagedCoordinator::new(order_process()?, detector);
    run_order(&ctx, &settings, coordinator).await
}

async fn run_order<D>(
    ctx: &WorkflowContext,
    settings: &OrderSettings,
    coordinator: StagedCoordinator<OrderStatus, D>,
) -> Result<bool, WorkflowError>
where
    D: CancellationDetector<OrderStatus>,
{
    let process = coordinator.process();
    ctx.set_query_handler(STATUS_QUERY, move || process.status());

    coordinator
        .run(ctx, |stage| {
            let ctx = ctx.clone();
            let duration = settings.stage_duration(stage);
            async move {
                if !duration.is_zero() {
                    ctx.sleep(duration).await?;
                }
                Ok(())
            }
        })
        .await
}
