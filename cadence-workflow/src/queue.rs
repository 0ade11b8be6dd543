//! Signal queues.
//!
//! A [`SignalQueue`] decouples signal arrival (external, concurrent) from
//! signal consumption (inside workflow logic). Enqueue never blocks and may
//! be called from any task. Dequeue is a suspension point of the workflow:
//! its outcome, an item or a timeout, is recorded to history so that a
//! replay returns the same item for the same position without looking at
//! the live buffer.
//!
//! # Example
//! ```rust,ignore
//! let queue = ctx.new_queue::<String>("signal");
//! let name = queue.dequeue(&ctx, None).await?;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{from_payload, to_payload, QueueTimeoutError};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Notify;

use crate::context::WorkflowContext;
use crate::future::WorkflowError;
use crate::history::{duration_ms, EventAttributes};
use crate::signal::SignalDelivery;

/// Error returned when an item cannot be enqueued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("queue {queue} full (capacity {capacity})")]
    Full { queue: String, capacity: usize },
    #[error("queue {queue} closed")]
    Closed { queue: String },
    #[error("queue {queue} rejected payload: {reason}")]
    Decode { queue: String, reason: String },
}

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
}

struct QueueShared<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

/// FIFO queue of signals for one workflow instance
pub struct SignalQueue<T> {
    shared: Arc<QueueShared<T>>,
}

impl<T> Clone for SignalQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for SignalQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SignalQueue")
            .field("name", &self.shared.name)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> SignalQueue<T> {
    /// Create an unbounded queue
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, None)
    }

    /// Create a queue, optionally capped at `capacity` items
    pub fn with_capacity(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                name: name.into(),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    capacity,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Append an item. Never blocks.
    pub fn enqueue(&self, item: T) -> Result<(), EnqueueError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(EnqueueError::Closed {
                    queue: self.shared.name.clone(),
                });
            }
            if let Some(capacity) = state.capacity {
                if state.items.len() >= capacity {
                    return Err(EnqueueError::Full {
                        queue: self.shared.name.clone(),
                        capacity,
                    });
                }
            }
            state.items.push_back(item);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Number of buffered items. A live view, not replay-safe.
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Close the queue, returning the items nobody dequeued.
    pub fn close(&self) -> Vec<T> {
        let undelivered = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.shared.notify.notify_waiters();
        undelivered
    }

    /// Wait for the next live item. `None` once the queue is closed.
    async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

impl<T> SignalQueue<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    /// Take the next item, suspending the workflow until one arrives.
    ///
    /// A present item is returned without waiting. With `Some(timeout)` the
    /// wait is bounded and ends in [`WorkflowError::QueueTimeout`], never
    /// before `timeout` has elapsed. A zero timeout only takes an item that
    /// is already present.
    pub async fn dequeue(&self, ctx: &WorkflowContext, timeout: Option<Duration>) -> Result<T, WorkflowError> {
        let name = &self.shared.name;
        let timeout_ms = timeout.map(duration_ms);

        if ctx.is_replaying() {
            return match ctx.replay_dequeue(name, timeout_ms)? {
                Some(payload) => Ok(from_payload(payload)?),
                None => Err(QueueTimeoutError::new(name.clone(), timeout.unwrap_or_default()).into()),
            };
        }

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::debug!(
                        workflow_id = %ctx.workflow_info().workflow_execution.workflow_id,
                        queue = %name,
                        ?limit,
                        "dequeue timed out"
                    );
                    ctx.record(EventAttributes::DequeueTimedOut {
                        queue: name.clone(),
                        timeout_ms: duration_ms(limit),
                    });
                    return Err(QueueTimeoutError::new(name.clone(), limit).into());
                }
            },
            None => self.recv().await,
        };

        let item = received.ok_or_else(|| WorkflowError::QueueClosed(name.clone()))?;
        ctx.record(EventAttributes::SignalDequeued {
            queue: name.clone(),
            payload: to_payload(&item)?,
        });
        Ok(item)
    }
}

/// Type-erased view of a queue used by signal routing.
pub(crate) trait QueueSink: Send + Sync {
    fn push(&self, delivery: &SignalDelivery) -> Result<(), EnqueueError>;
    fn close(&self) -> usize;
}

impl<T> QueueSink for SignalQueue<T>
where
    T: DeserializeOwned + Send,
{
    fn push(&self, delivery: &SignalDelivery) -> Result<(), EnqueueError> {
        let item: T = from_payload(delivery.queue_item()).map_err(|e| EnqueueError::Decode {
            queue: self.shared.name.clone(),
            reason: e.to_string(),
        })?;
        self.enqueue(item)
    }

    fn close(&self) -> usize {
        SignalQueue::close(self).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_fifo_order() {
        let ctx = WorkflowContext::for_test("fifo");
        let queue = SignalQueue::<u32>::new("numbers");
        for i in 1..=5 {
            queue.enqueue(i).unwrap();
        }

        let mut out = Vec::new();
        for _ in 0..5 {
            out.push(queue.dequeue(&ctx, None).await.unwrap());
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_loses_nothing() {
        let ctx = WorkflowContext::for_test("concurrent");
        let queue = SignalQueue::<u32>::new("numbers");

        let mut producers = Vec::new();
        for p in 0..4u32 {
            let q = queue.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    q.enqueue(p * 100 + i).unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(queue.dequeue(&ctx, Some(Duration::ZERO)).await.unwrap());
        }
        // per-producer order is preserved
        for p in 0..4u32 {
            let mine: Vec<u32> = seen.iter().copied().filter(|v| v / 100 == p).collect();
            assert_eq!(mine, (0..25).map(|i| p * 100 + i).collect::<Vec<_>>());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_dequeue_times_out_no_earlier_than_deadline() {
        let ctx = WorkflowContext::for_test("timeout");
        let queue = SignalQueue::<String>::new("cancel");

        let started = Instant::now();
        let err = queue
            .dequeue(&ctx, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(err.is_queue_timeout());
        assert!(started.elapsed() >= Duration::from_secs(1));

        let timeouts = ctx
            .history()
            .events
            .iter()
            .filter(|e| matches!(e.attributes, EventAttributes::DequeueTimedOut { .. }))
            .count();
        assert_eq!(timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_item_returned_without_waiting() {
        let ctx = WorkflowContext::for_test("present");
        let queue = SignalQueue::<String>::new("signal");
        queue.enqueue("Sally".to_string()).unwrap();

        let started = Instant::now();
        let name = queue
            .dequeue(&ctx, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(name, "Sally");
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wakes_on_later_enqueue() {
        let ctx = WorkflowContext::for_test("wake");
        let queue = SignalQueue::<String>::new("signal");

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            producer.enqueue("late".to_string()).unwrap();
        });

        let item = queue.dequeue(&ctx, None).await.unwrap();
        assert_eq!(item, "late");
    }

    #[tokio::test]
    async fn test_capacity_and_close() {
        let ctx = WorkflowContext::for_test("close");
        let queue = SignalQueue::<u8>::with_capacity("small", Some(1));
        queue.enqueue(1).unwrap();
        assert!(matches!(queue.enqueue(2), Err(EnqueueError::Full { capacity: 1, .. })));

        assert_eq!(queue.close(), vec![1]);
        assert!(matches!(queue.enqueue(3), Err(EnqueueError::Closed { .. })));
        assert!(matches!(
            queue.dequeue(&ctx, None).await,
            Err(WorkflowError::QueueClosed(_))
        ));
    }
}
