//! # Hello samples
//!
//! Runs one sample workflow against an in-process host and prints what an
//! external caller observes.
//!
//! ```bash
//! cargo run -p hello-samples -- signal --name Sally
//! cargo run -p hello-samples -- sync-signal --strategy field --cancel-at packing
//! cargo run -p hello-samples -- activity --name Sally
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_client::{Client, ClientOptions, WorkflowClient, WorkflowHandle};
use cadence_core::{SignalArgs, StartWorkflowOptions};
use cadence_worker::{WorkerOptions, WorkflowHost};
use clap::{Parser, Subcommand, ValueEnum};
use hello_samples::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "hello-samples", about = "Run a sample workflow in-process")]
struct Cli {
    /// Worker defaults to start from
    #[arg(long, value_enum, env = "HELLO_SAMPLES_PROFILE", default_value = "development")]
    profile: Profile,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// The cancel handler writes the order status directly
    Field,
    /// Cancel requests are taken from a queue between stages
    Queue,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Greet a name delivered by an ordinary signal
    Signal {
        #[arg(long, default_value = "Sally")]
        name: String,
    },
    /// Process an order, optionally cancelling it once it reaches a stage
    SyncSignal {
        #[arg(long, value_enum, default_value = "queue")]
        strategy: Strategy,
        /// Stage at which to send the cancel request
        #[arg(long, value_enum)]
        cancel_at: Option<OrderStatus>,
        #[arg(long, env = "HELLO_SAMPLES_PICKING_SECS", default_value_t = 10)]
        picking_secs: u64,
        #[arg(long, env = "HELLO_SAMPLES_PACKING_SECS", default_value_t = 10)]
        packing_secs: u64,
        #[arg(long, env = "HELLO_SAMPLES_SHIPPING_SECS", default_value_t = 5)]
        shipping_secs: u64,
        /// Reply timeout of the cancel request, in seconds. Defaults to the
        /// longest stage plus one poll.
        #[arg(long)]
        reply_timeout_secs: Option<u64>,
    },
    /// Greet a name through an activity
    Activity {
        #[arg(long, default_value = "Sally")]
        name: String,
    },
}

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let options = match cli.profile {
        Profile::Development => WorkerOptions::development(),
        Profile::Production => WorkerOptions::production(),
    };
    let host = Arc::new(WorkflowHost::new(options.with_identity("hello-samples")));
    register_all(&host);
    let client: Arc<dyn Client> = Arc::new(WorkflowClient::new(host, ClientOptions::default()));

    match cli.command {
        Command::Signal { name } => {
            let handle = start(&client, "hello-signal", HELLO_SIGNAL_WORKFLOW, &()).await?;
            handle.signal(NAME_SIGNAL, &name).await?;
            let greeting: String = handle.get_result().await?;
            println!("{}", greeting);
        }
        Command::SyncSignal {
            strategy,
            cancel_at,
            picking_secs,
            packing_secs,
            shipping_secs,
            reply_timeout_secs,
        } => {
            let workflow_type = match strategy {
                Strategy::Field => ORDER_FIELD_POLLING_WORKFLOW,
                Strategy::Queue => ORDER_QUEUE_MEDIATED_WORKFLOW,
            };
            let settings = OrderSettings {
                picking_secs,
                packing_secs,
                shipping_secs,
                ..OrderSettings::default()
            };
            let handle = start(&client, "order", workflow_type, &settings).await?;

            if let Some(stage) = cancel_at {
                // Pending has no duration and is over before a query can see
                // it, so that cancel goes out right after start.
                if stage != OrderStatus::Pending {
                    wait_for_status(&handle, stage).await?;
                }
                let reply_timeout = reply_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| settings.cancel_reply_timeout());
                let accepted: bool = handle
                    .signal_sync(CANCEL_SIGNAL, SignalArgs::new(), Some(reply_timeout))
                    .await
                    .context("cancel request failed")?;
                println!("Cancel request at {:?} accepted: {}", stage, accepted);
            }

            let shipped: bool = handle.get_result().await?;
            let status: OrderStatus = handle.query(STATUS_QUERY).await?;
            println!("Order shipped: {} (final status {:?})", shipped, status);
        }
        Command::Activity { name } => {
            let handle = start(&client, "hello-activity", HELLO_ACTIVITY_WORKFLOW, &name).await?;
            let greeting: String = handle.get_result().await?;
            println!("{}", greeting);
        }
    }

    Ok(())
}

async fn start<I: serde::Serialize>(
    client: &Arc<dyn Client>,
    id_prefix: &str,
    workflow_type: &str,
    input: &I,
) -> anyhow::Result<WorkflowHandle> {
    let options = StartWorkflowOptions::with_id(format!("{}-{}", id_prefix, std::process::id()));
    WorkflowHandle::start(client.clone(), options, workflow_type, input)
        .await
        .with_context(|| format!("failed to start {}", workflow_type))
}

async fn wait_for_status(handle: &WorkflowHandle, stage: OrderStatus) -> anyhow::Result<()> {
    loop {
        if let Ok(status) = handle.query::<OrderStatus>(STATUS_QUERY).await {
            if status == stage {
                return Ok(());
            }
        }
        if handle.describe().await?.is_closed() {
            anyhow::bail!("order closed before reaching {:?}", stage);
        }
        tokio::time::sleep(STATUS_POLL_INTERVAL).await;
    }
}
