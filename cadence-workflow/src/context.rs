//! Workflow context and core functions for authoring workflows.
//!
//! Every suspension point of workflow logic, durable sleep, activity await
//! and queue dequeue, goes through a [`WorkflowContext`] passed explicitly to
//! the workflow function. A live context waits on real timers, activities
//! and queues and records each outcome. A replaying context reads the same
//! outcomes back from a recorded [`WorkflowHistory`] and never waits.
//!
//! Signals are never delivered as interrupts. The host hands them to
//! [`WorkflowContext::deliver_signal`] between polls of the workflow future;
//! they land in a [`SignalQueue`] or run a registered signal handler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cadence_activity::{ActivityContext, ActivityInfo, ActivityInvoker};
use cadence_core::{
    from_payload, to_payload, ActivityError, AlreadyRepliedError, CadenceResult, EncodingError,
    NonDeterminismReason, NonDeterministicError, Payload, ServerError, WorkflowExecution,
    WorkflowInfo, WorkflowType,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::future::WorkflowError;
use crate::gateway::SignalGateway;
use crate::history::{duration_ms, EventAttributes, HistoryEvent, WorkflowHistory};
use crate::queue::{QueueSink, SignalQueue};
use crate::signal::{SignalDelivery, SignalRequest};

type SignalHandlerFn = Arc<dyn Fn(Payload) -> Result<Option<Payload>, EncodingError> + Send + Sync>;
type QueryHandlerFn = Arc<dyn Fn() -> Result<Payload, EncodingError> + Send + Sync>;

#[derive(Clone)]
enum SignalRoute {
    Queue(Arc<dyn QueueSink>),
    Handler(SignalHandlerFn),
}

struct ContextState {
    history: Vec<HistoryEvent>,
    replay: VecDeque<HistoryEvent>,
    next_event_id: u64,
    timer_seq: u64,
    activity_seq: u64,
    now: DateTime<Utc>,
    routes: HashMap<String, SignalRoute>,
    buffered: HashMap<String, VecDeque<SignalDelivery>>,
    queries: HashMap<String, QueryHandlerFn>,
    replied: HashSet<Uuid>,
    nondeterminism: Option<NonDeterministicError>,
    closed: bool,
}

impl ContextState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            history: Vec::new(),
            replay: VecDeque::new(),
            next_event_id: 0,
            timer_seq: 0,
            activity_seq: 0,
            now,
            routes: HashMap::new(),
            buffered: HashMap::new(),
            queries: HashMap::new(),
            replied: HashSet::new(),
            nondeterminism: None,
            closed: false,
        }
    }
}

struct ContextInner {
    info: WorkflowInfo,
    replaying: bool,
    activities: Option<Arc<dyn ActivityInvoker>>,
    gateway: Arc<SignalGateway>,
    queue_capacity: Option<usize>,
    state: Mutex<ContextState>,
}

/// Workflow context for executing workflow logic
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_execution", &self.inner.info.workflow_execution)
            .field("replaying", &self.inner.replaying)
            .finish()
    }
}

impl WorkflowContext {
    /// Live context for a newly started instance.
    pub fn new(
        info: WorkflowInfo,
        input: &Payload,
        activities: Arc<dyn ActivityInvoker>,
        gateway: Arc<SignalGateway>,
        queue_capacity: Option<usize>,
    ) -> Self {
        Self::live(info, input, Some(activities), gateway, queue_capacity)
    }

    fn live(
        info: WorkflowInfo,
        input: &Payload,
        activities: Option<Arc<dyn ActivityInvoker>>,
        gateway: Arc<SignalGateway>,
        queue_capacity: Option<usize>,
    ) -> Self {
        let mut state = ContextState::new(info.start_time);
        state.next_event_id = 1;
        state.history.push(HistoryEvent {
            event_id: 1,
            timestamp: info.start_time,
            attributes: EventAttributes::WorkflowExecutionStarted {
                workflow_id: info.workflow_execution.workflow_id.clone(),
                run_id: info.workflow_execution.run_id.clone(),
                workflow_type: info.workflow_type.name.clone(),
                input: input.clone(),
            },
        });

        Self {
            inner: Arc::new(ContextInner {
                info,
                replaying: false,
                activities,
                gateway,
                queue_capacity,
                state: Mutex::new(state),
            }),
        }
    }

    /// Replaying context over a recorded history. Returns the recorded input.
    pub fn replay(history: &WorkflowHistory) -> Result<(Self, Payload), NonDeterministicError> {
        let mut events: VecDeque<HistoryEvent> = history.events.iter().cloned().collect();
        let started = events.pop_front();
        let (workflow_id, run_id, workflow_type, input, timestamp) = match started {
            Some(HistoryEvent {
                timestamp,
                attributes:
                    EventAttributes::WorkflowExecutionStarted {
                        workflow_id,
                        run_id,
                        workflow_type,
                        input,
                    },
                ..
            }) => (workflow_id, run_id, workflow_type, input, timestamp),
            other => {
                return Err(NonDeterministicError {
                    reason: NonDeterminismReason::Mismatch,
                    workflow_type: String::new(),
                    workflow_id: String::new(),
                    expected: Some("WorkflowExecutionStarted".to_string()),
                    actual: other.map(|e| e.attributes.to_string()),
                })
            }
        };

        let mut state = ContextState::new(timestamp);
        state.history.extend(history.events.first().cloned());
        state.replay = events;

        let info = WorkflowInfo {
            workflow_execution: WorkflowExecution::new(workflow_id.clone(), run_id),
            workflow_type: WorkflowType::new(workflow_type),
            start_time: timestamp,
        };
        let ctx = Self {
            inner: Arc::new(ContextInner {
                info,
                replaying: true,
                activities: None,
                gateway: Arc::new(SignalGateway::new(workflow_id)),
                queue_capacity: None,
                state: Mutex::new(state),
            }),
        };
        Ok((ctx, input))
    }

    /// Get workflow information
    pub fn workflow_info(&self) -> &WorkflowInfo {
        &self.inner.info
    }

    fn workflow_id(&self) -> &str {
        &self.inner.info.workflow_execution.workflow_id
    }

    pub fn is_replaying(&self) -> bool {
        self.inner.replaying
    }

    /// Deterministic workflow time: the timestamp of the latest history event.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.state.lock().now
    }

    /// Snapshot of the history recorded (or consumed, when replaying) so far.
    pub fn history(&self) -> WorkflowHistory {
        WorkflowHistory::new(self.inner.state.lock().history.clone())
    }

    /// Durable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        let timer_id = {
            let mut state = self.inner.state.lock();
            state.timer_seq += 1;
            format!("timer-{}", state.timer_seq)
        };
        let duration_ms = duration_ms(duration);

        if self.is_replaying() {
            let event = self.next_replay_event("TimerFired")?;
            return match event.attributes {
                EventAttributes::TimerFired {
                    timer_id: ref recorded_id,
                    duration_ms: recorded_ms,
                } if *recorded_id == timer_id && recorded_ms == duration_ms => Ok(()),
                other => Err(self.mismatch(
                    format!("TimerFired(timer_id={}, duration_ms={})", timer_id, duration_ms),
                    &other,
                )),
            };
        }

        tokio::time::sleep(duration).await;
        self.record(EventAttributes::TimerFired {
            timer_id,
            duration_ms,
        });
        Ok(())
    }

    /// Execute an activity and await its result.
    ///
    /// A failure is returned as [`WorkflowError::Activity`]; whether it is
    /// fatal is up to the workflow.
    pub async fn execute_activity<I, O>(&self, activity_type: &str, input: &I) -> Result<O, WorkflowError>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let activity_id = {
            let mut state = self.inner.state.lock();
            state.activity_seq += 1;
            state.activity_seq.to_string()
        };
        let input = to_payload(input)?;

        if self.is_replaying() {
            let event = self.next_replay_event("ActivityTaskCompleted")?;
            return match event.attributes {
                EventAttributes::ActivityTaskCompleted {
                    activity_id: ref id,
                    activity_type: ref ty,
                    result,
                } if *id == activity_id && ty == activity_type => Ok(from_payload(result)?),
                EventAttributes::ActivityTaskFailed {
                    activity_id: ref id,
                    activity_type: ref ty,
                    error,
                } if *id == activity_id && ty == activity_type => Err(error.into()),
                other => Err(self.mismatch(
                    format!("ActivityTask(activity_id={}, activity_type={})", activity_id, activity_type),
                    &other,
                )),
            };
        }

        let result = match &self.inner.activities {
            Some(invoker) => {
                let ctx = ActivityContext::new(ActivityInfo {
                    activity_id: activity_id.clone(),
                    activity_type: activity_type.to_string(),
                    workflow_execution: self.inner.info.workflow_execution.clone(),
                    attempt: 1,
                });
                invoker.invoke(ctx, input).await
            }
            None => Err(ActivityError::NotRegistered(activity_type.to_string())),
        };

        match result {
            Ok(output) => {
                self.record(EventAttributes::ActivityTaskCompleted {
                    activity_id,
                    activity_type: activity_type.to_string(),
                    result: output.clone(),
                });
                Ok(from_payload(output)?)
            }
            Err(error) => {
                tracing::warn!(
                    workflow_id = %self.workflow_id(),
                    activity_type,
                    error = %error,
                    "activity failed"
                );
                self.record(EventAttributes::ActivityTaskFailed {
                    activity_id,
                    activity_type: activity_type.to_string(),
                    error: error.clone(),
                });
                Err(error.into())
            }
        }
    }

    /// Start listening on `signal_name`.
    ///
    /// Signals that arrived before this call are moved into the new queue
    /// in arrival order.
    pub fn new_queue<T>(&self, signal_name: &str) -> SignalQueue<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let queue = SignalQueue::with_capacity(signal_name, self.inner.queue_capacity);
        self.install_route(signal_name, SignalRoute::Queue(Arc::new(queue.clone())));
        queue
    }

    /// Handle `signal_name` with a callback instead of a queue.
    ///
    /// The callback runs between suspension points of the workflow. For a
    /// synchronous signal its return value is the reply.
    pub fn set_signal_handler<A, R, F>(&self, signal_name: &str, handler: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.set_signal_handler_or_abandon(signal_name, move |args: A| Some(handler(args)));
    }

    /// Like [`set_signal_handler`](Self::set_signal_handler), but the handler
    /// may decline to answer. `None` abandons a synchronous caller, which then
    /// sees a signal abandoned error instead of a reply.
    pub fn set_signal_handler_or_abandon<A, R, F>(&self, signal_name: &str, handler: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Option<R> + Send + Sync + 'static,
    {
        let handler: SignalHandlerFn = Arc::new(move |payload| {
            let args: A = from_payload(payload)?;
            handler(args).map(|reply| to_payload(&reply)).transpose()
        });
        self.install_route(signal_name, SignalRoute::Handler(handler));
    }

    /// Register a read-only query
    pub fn set_query_handler<R, F>(&self, query_type: &str, handler: F)
    where
        R: Serialize,
        F: Fn() -> R + Send + Sync + 'static,
    {
        let handler: QueryHandlerFn = Arc::new(move || to_payload(&handler()));
        self.inner
            .state
            .lock()
            .queries
            .insert(query_type.to_string(), handler);
    }

    /// Answer a synchronous signal.
    pub fn reply<R: Serialize>(&self, request: &SignalRequest<R>, value: R) -> Result<(), WorkflowError> {
        let request_id = request.id();
        let value = to_payload(&value)?;

        if self.is_replaying() {
            if !self.inner.state.lock().replied.insert(request_id) {
                return Err(AlreadyRepliedError::new(request_id).into());
            }
            let event = self.next_replay_event("SignalReplied")?;
            return match event.attributes {
                EventAttributes::SignalReplied {
                    request_id: recorded,
                    value: ref recorded_value,
                } if recorded == request_id && *recorded_value == value => Ok(()),
                other => Err(self.mismatch(format!("SignalReplied(request_id={})", request_id), &other)),
            };
        }

        match self.inner.gateway.reply(request_id, value.clone()) {
            Ok(()) => {
                self.record(EventAttributes::SignalReplied { request_id, value });
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    workflow_id = %self.workflow_id(),
                    signal_name = request.signal_name(),
                    %request_id,
                    "workflow replied twice to the same synchronous signal"
                );
                Err(err.into())
            }
        }
    }

    /// Hand a signal to the instance. Called by the host between polls.
    pub fn deliver_signal(&self, delivery: SignalDelivery) {
        let route = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                self.reject(&delivery, "workflow closed");
                return;
            }
            match state.routes.get(&delivery.signal_name) {
                Some(route) => route.clone(),
                None => {
                    tracing::debug!(
                        workflow_id = %self.workflow_id(),
                        signal_name = %delivery.signal_name,
                        "no listener yet, buffering signal"
                    );
                    state
                        .buffered
                        .entry(delivery.signal_name.clone())
                        .or_default()
                        .push_back(delivery);
                    return;
                }
            }
        };
        self.apply_delivery(&route, delivery);
    }

    /// Run a registered query. Called by the host between polls.
    pub fn query(&self, query_type: &str) -> CadenceResult<Payload> {
        let handler = self
            .inner
            .state
            .lock()
            .queries
            .get(query_type)
            .cloned()
            .ok_or_else(|| ServerError::QueryFailed {
                message: format!("unknown query type: {}", query_type),
            })?;
        Ok(handler()?)
    }

    /// Record the terminal event of a live run.
    pub fn record_close(&self, result: &Result<Payload, String>) {
        if self.is_replaying() {
            return;
        }
        self.record(match result {
            Ok(result) => EventAttributes::WorkflowExecutionCompleted {
                result: result.clone(),
            },
            Err(reason) => EventAttributes::WorkflowExecutionFailed {
                reason: reason.clone(),
            },
        });
    }

    /// Close every queue and abandon every pending synchronous signal.
    ///
    /// Queues and signal handlers are released; query handlers and the
    /// history stay so a closed instance can still be inspected. Returns the
    /// number of abandoned requests.
    pub fn close(&self) -> usize {
        let sinks: Vec<Arc<dyn QueueSink>> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.buffered.clear();
            state
                .routes
                .drain()
                .filter_map(|(_, route)| match route {
                    SignalRoute::Queue(sink) => Some(sink),
                    SignalRoute::Handler(_) => None,
                })
                .collect()
        };

        let undelivered: usize = sinks.iter().map(|sink| sink.close()).sum();
        if undelivered > 0 {
            tracing::info!(workflow_id = %self.workflow_id(), undelivered, "dropping undelivered signals");
        }
        self.inner.gateway.abandon_all()
    }

    /// First divergence from the recorded history seen while replaying.
    pub fn nondeterminism(&self) -> Option<NonDeterministicError> {
        self.inner.state.lock().nondeterminism.clone()
    }

    /// Apply trailing handler signals and return the recorded close event, if any.
    ///
    /// Fails if recorded events remain that the replayed logic never reached.
    pub fn finish_replay(&self) -> Result<Option<HistoryEvent>, WorkflowError> {
        loop {
            let event = {
                let mut state = self.inner.state.lock();
                let event = state.replay.pop_front();
                state.history.extend(event.clone());
                event
            };
            let Some(event) = event else {
                return Ok(None);
            };
            match &event.attributes {
                EventAttributes::WorkflowExecutionSignaled {
                    signal_name, payload, ..
                } => self.replay_signal(signal_name, payload.clone())?,
                attributes if attributes.is_close_event() => {
                    let remaining = self.inner.state.lock().replay.len();
                    if remaining > 0 {
                        return Err(self.nondeterministic(
                            NonDeterminismReason::ExtraReplayEvent,
                            None,
                            Some(format!("{} events after {}", remaining, attributes)),
                        ));
                    }
                    return Ok(Some(event));
                }
                other => {
                    return Err(self.nondeterministic(
                        NonDeterminismReason::ExtraReplayEvent,
                        None,
                        Some(other.to_string()),
                    ))
                }
            }
        }
    }

    pub(crate) fn record(&self, attributes: EventAttributes) {
        let mut state = self.inner.state.lock();
        state.next_event_id += 1;
        let timestamp = Utc::now();
        state.now = timestamp;
        let event_id = state.next_event_id;
        state.history.push(HistoryEvent {
            event_id,
            timestamp,
            attributes,
        });
    }

    /// Replay a dequeue. `Some(item)` or `None` for a recorded timeout.
    pub(crate) fn replay_dequeue(&self, queue: &str, timeout_ms: Option<u64>) -> Result<Option<Payload>, WorkflowError> {
        let event = self.next_replay_event("SignalDequeued")?;
        match event.attributes {
            EventAttributes::SignalDequeued {
                queue: ref recorded,
                payload,
            } if recorded == queue => Ok(Some(payload)),
            EventAttributes::DequeueTimedOut {
                queue: ref recorded,
                timeout_ms: recorded_ms,
            } if recorded == queue && Some(recorded_ms) == timeout_ms => Ok(None),
            other => Err(self.mismatch(format!("dequeue(queue={}, timeout_ms={:?})", queue, timeout_ms), &other)),
        }
    }

    fn install_route(&self, signal_name: &str, route: SignalRoute) {
        let buffered = {
            let mut state = self.inner.state.lock();
            if state.routes.insert(signal_name.to_string(), route.clone()).is_some() {
                tracing::warn!(
                    workflow_id = %self.workflow_id(),
                    signal_name,
                    "replacing existing signal listener"
                );
            }
            state.buffered.remove(signal_name).unwrap_or_default()
        };
        for delivery in buffered {
            self.apply_delivery(&route, delivery);
        }
    }

    fn apply_delivery(&self, route: &SignalRoute, delivery: SignalDelivery) {
        match route {
            SignalRoute::Queue(sink) => {
                if let Err(err) = sink.push(&delivery) {
                    self.reject(&delivery, &err.to_string());
                }
            }
            SignalRoute::Handler(handler) => match handler(delivery.payload.clone()) {
                Ok(reply) => {
                    self.record(EventAttributes::WorkflowExecutionSignaled {
                        signal_name: delivery.signal_name.clone(),
                        payload: delivery.payload,
                        request_id: delivery.request_id,
                    });
                    match (delivery.request_id, reply) {
                        (Some(request_id), Some(reply)) => {
                            if let Err(err) = self.inner.gateway.reply(request_id, reply) {
                                tracing::error!(
                                    workflow_id = %self.workflow_id(),
                                    %request_id,
                                    error = %err,
                                    "signal handler reply rejected"
                                );
                            }
                        }
                        (Some(request_id), None) => {
                            tracing::debug!(
                                workflow_id = %self.workflow_id(),
                                signal_name = %delivery.signal_name,
                                %request_id,
                                "signal handler declined to reply, abandoning"
                            );
                            self.inner.gateway.abandon(request_id);
                        }
                        (None, _) => {}
                    }
                }
                Err(err) => self.reject(&delivery, &err.to_string()),
            },
        }
    }

    fn reject(&self, delivery: &SignalDelivery, reason: &str) {
        tracing::warn!(
            workflow_id = %self.workflow_id(),
            signal_name = %delivery.signal_name,
            reason,
            "signal dropped"
        );
        if let Some(request_id) = delivery.request_id {
            self.inner.gateway.abandon(request_id);
        }
    }

    fn next_replay_event(&self, expected: &str) -> Result<HistoryEvent, WorkflowError> {
        loop {
            let event = {
                let mut state = self.inner.state.lock();
                match state.replay.front() {
                    Some(front) if front.attributes.is_close_event() => None,
                    Some(_) => state.replay.pop_front(),
                    None => None,
                }
            };
            let Some(event) = event else {
                return Err(self.nondeterministic(
                    NonDeterminismReason::MissingReplayEvent,
                    Some(expected.to_string()),
                    None,
                ));
            };

            {
                let mut state = self.inner.state.lock();
                state.now = event.timestamp;
                state.history.push(event.clone());
            }

            match &event.attributes {
                EventAttributes::WorkflowExecutionSignaled {
                    signal_name, payload, ..
                } => self.replay_signal(signal_name, payload.clone())?,
                _ => return Ok(event),
            }
        }
    }

    fn replay_signal(&self, signal_name: &str, payload: Payload) -> Result<(), WorkflowError> {
        let route = self.inner.state.lock().routes.get(signal_name).cloned();
        match route {
            Some(SignalRoute::Handler(handler)) => {
                handler(payload)?;
                Ok(())
            }
            _ => Err(self.nondeterministic(
                NonDeterminismReason::Mismatch,
                Some(format!("signal handler for {}", signal_name)),
                Some("no handler registered".to_string()),
            )),
        }
    }

    fn mismatch(&self, expected: String, actual: &EventAttributes) -> WorkflowError {
        self.nondeterministic(NonDeterminismReason::Mismatch, Some(expected), Some(actual.to_string()))
    }

    fn nondeterministic(
        &self,
        reason: NonDeterminismReason,
        expected: Option<String>,
        actual: Option<String>,
    ) -> WorkflowError {
        let err = NonDeterministicError {
            reason,
            workflow_type: self.inner.info.workflow_type.name.clone(),
            workflow_id: self.workflow_id().to_string(),
            expected,
            actual,
        };
        tracing::error!(error = %err, "replay diverged from history");
        self.inner
            .state
            .lock()
            .nondeterminism
            .get_or_insert_with(|| err.clone());
        err.into()
    }

    #[cfg(test)]
    pub(crate) fn for_test(workflow_id: &str) -> Self {
        let info = WorkflowInfo {
            workflow_execution: WorkflowExecution::new(workflow_id, "test-run"),
            workflow_type: WorkflowType::new("test"),
            start_time: Utc::now(),
        };
        Self::live(info, &Payload::Null, None, Arc::new(SignalGateway::new(workflow_id)), None)
    }

    #[cfg(test)]
    pub(crate) fn gateway(&self) -> &Arc<SignalGateway> {
        &self.inner.gateway
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::SignalArgs;
    use serde_json::json;

    #[tokio::test]
    async fn test_signals_before_listener_are_buffered_in_order() {
        let ctx = WorkflowContext::for_test("buffered");
        ctx.deliver_signal(SignalDelivery::fire_and_forget("names", json!("a")));
        ctx.deliver_signal(SignalDelivery::fire_and_forget("names", json!("b")));

        let queue = ctx.new_queue::<String>("names");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(&ctx, None).await.unwrap(), "a");
        assert_eq!(queue.dequeue(&ctx, None).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_sync_signal_through_queue_is_replied_once() {
        let ctx = WorkflowContext::for_test("sync");
        let queue = ctx.new_queue::<SignalRequest<bool>>("cancel");

        let pending = ctx.gateway().submit("cancel");
        let delivery = SignalDelivery::synchronous("cancel", &SignalArgs::new(), pending.request_id()).unwrap();
        ctx.deliver_signal(delivery);

        let request = queue.dequeue(&ctx, None).await.unwrap();
        request.reply(&ctx, true).unwrap();
        let err = request.reply(&ctx, false).unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyReplied(_)));

        assert_eq!(pending.wait(None).await.unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_handler_reply_and_history() {
        let ctx = WorkflowContext::for_test("handler");
        ctx.set_signal_handler("double", |n: i64| n * 2);

        let pending = ctx.gateway().submit("double");
        ctx.deliver_signal(SignalDelivery {
            signal_name: "double".into(),
            payload: json!(21),
            request_id: Some(pending.request_id()),
        });
        assert_eq!(pending.wait(None).await.unwrap(), json!(42));

        let history = ctx.history();
        assert!(matches!(
            history.events.last().map(|e| &e.attributes),
            Some(EventAttributes::WorkflowExecutionSignaled { signal_name, .. }) if signal_name == "double"
        ));
    }

    #[tokio::test]
    async fn test_declining_handler_abandons_caller() {
        let ctx = WorkflowContext::for_test("decline");
        ctx.set_signal_handler_or_abandon("odd", |n: i64| if n % 2 == 1 { Some(n) } else { None });

        let answered = ctx.gateway().submit("odd");
        ctx.deliver_signal(SignalDelivery {
            signal_name: "odd".into(),
            payload: json!(3),
            request_id: Some(answered.request_id()),
        });
        let declined = ctx.gateway().submit("odd");
        ctx.deliver_signal(SignalDelivery {
            signal_name: "odd".into(),
            payload: json!(4),
            request_id: Some(declined.request_id()),
        });

        assert_eq!(answered.wait(None).await.unwrap(), json!(3));
        assert!(declined.wait(None).await.unwrap_err().is_abandoned());
        // both deliveries ran the handler, so both are part of the history
        let signaled = ctx
            .history()
            .events
            .iter()
            .filter(|e| matches!(e.attributes, EventAttributes::WorkflowExecutionSignaled { .. }))
            .count();
        assert_eq!(signaled, 2);
    }

    #[tokio::test]
    async fn test_undecodable_sync_signal_is_abandoned() {
        let ctx = WorkflowContext::for_test("mismatch");
        let _queue = ctx.new_queue::<u32>("numbers");

        let pending = ctx.gateway().submit("numbers");
        ctx.deliver_signal(
            SignalDelivery::synchronous("numbers", &SignalArgs::new(), pending.request_id()).unwrap(),
        );
        assert!(pending.wait(None).await.unwrap_err().is_abandoned());
    }

    #[tokio::test]
    async fn test_close_abandons_pending_and_buffered() {
        let ctx = WorkflowContext::for_test("close");
        let queue = ctx.new_queue::<SignalRequest<bool>>("cancel");

        let queued = ctx.gateway().submit("cancel");
        ctx.deliver_signal(
            SignalDelivery::synchronous("cancel", &SignalArgs::new(), queued.request_id()).unwrap(),
        );
        let buffered = ctx.gateway().submit("other");
        ctx.deliver_signal(
            SignalDelivery::synchronous("other", &SignalArgs::new(), buffered.request_id()).unwrap(),
        );

        assert_eq!(ctx.close(), 2);
        assert!(queue.is_closed());
        assert!(queued.wait(None).await.unwrap_err().is_abandoned());
        assert!(buffered.wait(None).await.unwrap_err().is_abandoned());

        let late = ctx.gateway().submit("cancel");
        assert!(late.wait(None).await.unwrap_err().is_abandoned());
    }

    #[tokio::test]
    async fn test_query_handler() {
        let ctx = WorkflowContext::for_test("query");
        ctx.set_query_handler("status", || "Picking");
        assert_eq!(ctx.query("status").unwrap(), json!("Picking"));
        assert!(ctx.query("missing").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_reads_outcomes_from_history() {
        let ctx = WorkflowContext::for_test("replay");
        let queue = ctx.new_queue::<String>("signal");
        ctx.deliver_signal(SignalDelivery::fire_and_forget("signal", json!("Sally")));

        ctx.sleep(Duration::from_secs(10)).await.unwrap();
        let name = queue.dequeue(&ctx, None).await.unwrap();
        assert!(queue.dequeue(&ctx, Some(Duration::from_secs(1))).await.is_err());
        ctx.record_close(&Ok(json!(format!("Hello {}!", name))));

        let history = ctx.history();
        let (replay, input) = WorkflowContext::replay(&history).unwrap();
        assert_eq!(input, Payload::Null);
        assert!(replay.is_replaying());

        let started = tokio::time::Instant::now();
        let queue = replay.new_queue::<String>("signal");
        replay.sleep(Duration::from_secs(10)).await.unwrap();
        assert_eq!(queue.dequeue(&replay, None).await.unwrap(), "Sally");
        assert!(queue
            .dequeue(&replay, Some(Duration::from_secs(1)))
            .await
            .unwrap_err()
            .is_queue_timeout());
        assert_eq!(started.elapsed(), Duration::ZERO);

        let close = replay.finish_replay().unwrap().unwrap();
        assert!(close.attributes.is_close_event());
        assert!(replay.nondeterminism().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_detects_changed_timer() {
        let ctx = WorkflowContext::for_test("diverge");
        ctx.sleep(Duration::from_secs(10)).await.unwrap();

        let (replay, _) = WorkflowContext::replay(&ctx.history()).unwrap();
        let err = replay.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NonDeterministic(_)));
        assert_eq!(
            replay.nondeterminism().map(|e| e.reason),
            Some(NonDeterminismReason::Mismatch)
        );
    }

    #[tokio::test]
    async fn test_replay_missing_event() {
        let ctx = WorkflowContext::for_test("short");
        let (replay, _) = WorkflowContext::replay(&ctx.history()).unwrap();
        let err = replay.sleep(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::NonDeterministic(NonDeterministicError {
                reason: NonDeterminismReason::MissingReplayEvent,
                ..
            })
        ));
    }
}
