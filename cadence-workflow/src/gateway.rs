//! Synchronous signal gateway.
//!
//! Correlates an externally invoked synchronous signal with the reply that
//! workflow logic produces later. The caller blocks on a [`PendingReply`];
//! workflow logic resolves it with [`SignalGateway::reply`]. When the
//! instance terminates, [`SignalGateway::abandon_all`] resolves every
//! pending request so that no caller waits forever.
//!
//! A request is tracked only while it is pending. Once it is replied or
//! abandoned its caller is released and only the id is remembered, so that a
//! second reply is still detected.

use std::collections::HashMap;
use std::time::Duration;

use cadence_core::{AlreadyRepliedError, Payload, SignalError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Reply state of a synchronous signal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    Pending,
    Replied,
    Abandoned,
}

#[derive(Debug)]
enum ReplyOutcome {
    Replied(Payload),
    Abandoned,
}

struct PendingEntry {
    signal_name: String,
    waiter: oneshot::Sender<ReplyOutcome>,
}

#[derive(Default)]
struct GatewayState {
    pending: HashMap<Uuid, PendingEntry>,
    resolved: HashMap<Uuid, ReplyState>,
    closed: bool,
}

/// Per-instance correlation table for synchronous signals
pub struct SignalGateway {
    workflow_id: String,
    state: Mutex<GatewayState>,
}

impl SignalGateway {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            state: Mutex::new(GatewayState::default()),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Open a request with a fresh correlation id.
    ///
    /// On a closed gateway the request is abandoned at once and not tracked.
    pub fn submit(&self, signal_name: &str) -> PendingReply {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();

        if state.closed {
            tracing::debug!(
                workflow_id = %self.workflow_id,
                signal_name,
                %request_id,
                "synchronous signal submitted after close, abandoning"
            );
            let _ = tx.send(ReplyOutcome::Abandoned);
        } else {
            state.pending.insert(
                request_id,
                PendingEntry {
                    signal_name: signal_name.to_string(),
                    waiter: tx,
                },
            );
        }

        PendingReply {
            request_id,
            signal_name: signal_name.to_string(),
            workflow_id: self.workflow_id.clone(),
            rx,
        }
    }

    /// Resolve a request with `value`.
    ///
    /// Fails with [`AlreadyRepliedError`] once the request was replied or
    /// abandoned; the first outcome is kept. A reply whose caller already
    /// gave up is accepted and dropped, as is a reply to an id this gateway
    /// never issued.
    pub fn reply(&self, request_id: Uuid, value: Payload) -> Result<(), AlreadyRepliedError> {
        let mut state = self.state.lock();
        let Some(entry) = state.pending.remove(&request_id) else {
            if state.resolved.contains_key(&request_id) {
                return Err(AlreadyRepliedError::new(request_id));
            }
            tracing::warn!(
                workflow_id = %self.workflow_id,
                %request_id,
                "reply to unknown synchronous signal discarded"
            );
            return Ok(());
        };
        state.resolved.insert(request_id, ReplyState::Replied);

        if entry.waiter.send(ReplyOutcome::Replied(value)).is_err() {
            tracing::debug!(
                workflow_id = %self.workflow_id,
                signal_name = %entry.signal_name,
                %request_id,
                "caller no longer waiting, reply discarded"
            );
        }
        Ok(())
    }

    /// Abandon a single pending request. Returns false if it was already resolved.
    pub fn abandon(&self, request_id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.pending.remove(&request_id) {
            Some(entry) => {
                state.resolved.insert(request_id, ReplyState::Abandoned);
                let _ = entry.waiter.send(ReplyOutcome::Abandoned);
                true
            }
            None => false,
        }
    }

    /// Close the gateway and abandon every pending request.
    pub fn abandon_all(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let pending: Vec<(Uuid, PendingEntry)> = state.pending.drain().collect();
        let abandoned = pending.len();
        for (request_id, entry) in pending {
            state.resolved.insert(request_id, ReplyState::Abandoned);
            let _ = entry.waiter.send(ReplyOutcome::Abandoned);
        }
        if abandoned > 0 {
            tracing::info!(
                workflow_id = %self.workflow_id,
                abandoned,
                "abandoned pending synchronous signals"
            );
        }
        abandoned
    }

    /// `None` for ids this gateway is not tracking.
    pub fn reply_state(&self, request_id: Uuid) -> Option<ReplyState> {
        let state = self.state.lock();
        if state.pending.contains_key(&request_id) {
            return Some(ReplyState::Pending);
        }
        state.resolved.get(&request_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// The caller's side of a synchronous signal
#[derive(Debug)]
pub struct PendingReply {
    request_id: Uuid,
    signal_name: String,
    workflow_id: String,
    rx: oneshot::Receiver<ReplyOutcome>,
}

impl PendingReply {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Block until the request is replied, abandoned, or `timeout` elapses.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Payload, SignalError> {
        let PendingReply {
            request_id,
            signal_name,
            workflow_id,
            rx,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(%workflow_id, %signal_name, %request_id, ?limit, "synchronous signal timed out");
                    return Err(SignalError::Timeout {
                        signal_name,
                        request_id,
                        timeout: limit,
                    });
                }
            },
            None => rx.await,
        };

        match received {
            Ok(ReplyOutcome::Replied(value)) => Ok(value),
            // A dropped sender means the gateway itself went away.
            Ok(ReplyOutcome::Abandoned) | Err(_) => Err(SignalError::Abandoned {
                workflow_id,
                signal_name,
                request_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use serde_json::json;

    #[tokio::test]
    async fn test_reply_unblocks_caller() {
        let gateway = Arc::new(SignalGateway::new("wf-1"));
        let pending = gateway.submit("cancel");
        let id = pending.request_id();

        let g = gateway.clone();
        tokio::spawn(async move {
            g.reply(id, json!(true)).unwrap();
        });

        assert_eq!(pending.wait(None).await.unwrap(), json!(true));
        assert_eq!(gateway.reply_state(id), Some(ReplyState::Replied));
    }

    #[tokio::test]
    async fn test_second_reply_fails_and_keeps_first_value() {
        let gateway = SignalGateway::new("wf-1");
        let pending = gateway.submit("cancel");
        let id = pending.request_id();

        gateway.reply(id, json!(true)).unwrap();
        let err = gateway.reply(id, json!(false)).unwrap_err();
        assert_eq!(err.request_id, id);

        assert_eq!(pending.wait(None).await.unwrap(), json!(true));
        assert_eq!(gateway.reply_state(id), Some(ReplyState::Replied));
    }

    #[tokio::test]
    async fn test_double_reply_leaves_other_requests_untouched() {
        let gateway = SignalGateway::new("wf-1");
        let first = gateway.submit("cancel");
        let second = gateway.submit("cancel");

        gateway.reply(first.request_id(), json!(1)).unwrap();
        assert!(gateway.reply(first.request_id(), json!(2)).is_err());
        assert_eq!(gateway.reply_state(second.request_id()), Some(ReplyState::Pending));

        gateway.reply(second.request_id(), json!(3)).unwrap();
        assert_eq!(second.wait(None).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_abandon_all_unblocks_with_abandoned() {
        let gateway = Arc::new(SignalGateway::new("wf-1"));
        let pending = gateway.submit("cancel");
        let id = pending.request_id();

        let waiter = tokio::spawn(pending.wait(None));
        tokio::task::yield_now().await;
        assert_eq!(gateway.abandon_all(), 1);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_abandoned());
        assert_eq!(err.request_id(), id);
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_abandoned() {
        let gateway = SignalGateway::new("wf-1");
        gateway.abandon_all();
        assert!(gateway.is_closed());

        let pending = gateway.submit("cancel");
        let id = pending.request_id();
        assert!(pending.wait(None).await.unwrap_err().is_abandoned());
        assert_eq!(gateway.reply_state(id), None);
        assert_eq!(gateway.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_reply_is_discarded() {
        let gateway = SignalGateway::new("wf-1");
        let pending = gateway.submit("cancel");
        let id = pending.request_id();

        let started = tokio::time::Instant::now();
        let err = pending.wait(Some(Duration::from_secs(5))).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(5));

        assert_eq!(gateway.reply_state(id), Some(ReplyState::Pending));
        gateway.reply(id, json!(true)).unwrap();
        assert_eq!(gateway.reply_state(id), Some(ReplyState::Replied));
    }

    #[tokio::test]
    async fn test_resolved_requests_release_their_entry() {
        let gateway = SignalGateway::new("wf-1");
        let replied = gateway.submit("cancel");
        let abandoned = gateway.submit("cancel");
        assert_eq!(gateway.pending_count(), 2);

        gateway.reply(replied.request_id(), json!(true)).unwrap();
        assert!(gateway.abandon(abandoned.request_id()));
        assert_eq!(gateway.pending_count(), 0);

        // the ids are still known, so neither can be answered again
        assert!(gateway.reply(replied.request_id(), json!(false)).is_err());
        assert!(gateway.reply(abandoned.request_id(), json!(false)).is_err());
        assert!(!gateway.abandon(replied.request_id()));

        assert_eq!(replied.wait(None).await.unwrap(), json!(true));
        assert!(abandoned.wait(None).await.unwrap_err().is_abandoned());
    }

    #[test]
    fn test_reply_to_unknown_id_creates_nothing() {
        let gateway = SignalGateway::new("wf-1");
        let stranger = Uuid::new_v4();
        gateway.reply(stranger, json!(true)).unwrap();
        assert_eq!(gateway.reply_state(stranger), None);
        assert_eq!(gateway.pending_count(), 0);
    }
}
