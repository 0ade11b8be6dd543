//! Workflow history.
//!
//! Every suspension outcome of a live instance is appended here. Replaying
//! the same logic against a recorded history must reproduce every event in
//! order; the context reads outcomes back instead of waiting on timers,
//! activities or queues.

use std::fmt;
use std::time::Duration;

use cadence_core::{ActivityError, Payload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single recorded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub attributes: EventAttributes,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "PascalCase")]
pub enum EventAttributes {
    WorkflowExecutionStarted {
        workflow_id: String,
        run_id: String,
        workflow_type: String,
        input: Payload,
    },
    TimerFired {
        timer_id: String,
        duration_ms: u64,
    },
    ActivityTaskCompleted {
        activity_id: String,
        activity_type: String,
        result: Payload,
    },
    ActivityTaskFailed {
        activity_id: String,
        activity_type: String,
        error: ActivityError,
    },
    SignalDequeued {
        queue: String,
        payload: Payload,
    },
    DequeueTimedOut {
        queue: String,
        timeout_ms: u64,
    },
    /// A signal applied through a registered handler rather than a queue.
    WorkflowExecutionSignaled {
        signal_name: String,
        payload: Payload,
        request_id: Option<Uuid>,
    },
    SignalReplied {
        request_id: Uuid,
        value: Payload,
    },
    WorkflowExecutionCompleted {
        result: Payload,
    },
    WorkflowExecutionFailed {
        reason: String,
    },
}

impl EventAttributes {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventAttributes::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventAttributes::TimerFired { .. } => "TimerFired",
            EventAttributes::ActivityTaskCompleted { .. } => "ActivityTaskCompleted",
            EventAttributes::ActivityTaskFailed { .. } => "ActivityTaskFailed",
            EventAttributes::SignalDequeued { .. } => "SignalDequeued",
            EventAttributes::DequeueTimedOut { .. } => "DequeueTimedOut",
            EventAttributes::WorkflowExecutionSignaled { .. } => "WorkflowExecutionSignaled",
            EventAttributes::SignalReplied { .. } => "SignalReplied",
            EventAttributes::WorkflowExecutionCompleted { .. } => "WorkflowExecutionCompleted",
            EventAttributes::WorkflowExecutionFailed { .. } => "WorkflowExecutionFailed",
        }
    }

    pub fn is_close_event(&self) -> bool {
        matches!(
            self,
            EventAttributes::WorkflowExecutionCompleted { .. }
                | EventAttributes::WorkflowExecutionFailed { .. }
        )
    }
}

impl fmt::Display for EventAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAttributes::TimerFired { timer_id, duration_ms } => {
                write!(f, "TimerFired(timer_id={}, duration_ms={})", timer_id, duration_ms)
            }
            EventAttributes::ActivityTaskCompleted { activity_id, activity_type, .. }
            | EventAttributes::ActivityTaskFailed { activity_id, activity_type, .. } => write!(
                f,
                "{}(activity_id={}, activity_type={})",
                self.event_type(),
                activity_id,
                activity_type
            ),
            EventAttributes::SignalDequeued { queue, .. } => write!(f, "SignalDequeued(queue={})", queue),
            EventAttributes::DequeueTimedOut { queue, timeout_ms } => {
                write!(f, "DequeueTimedOut(queue={}, timeout_ms={})", queue, timeout_ms)
            }
            EventAttributes::WorkflowExecutionSignaled { signal_name, .. } => {
                write!(f, "WorkflowExecutionSignaled(signal_name={})", signal_name)
            }
            EventAttributes::SignalReplied { request_id, .. } => {
                write!(f, "SignalReplied(request_id={})", request_id)
            }
            other => f.write_str(other.event_type()),
        }
    }
}

/// Milliseconds as recorded in events, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Ordered history of one workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistory {
    pub events: Vec<HistoryEvent>,
}

impl WorkflowHistory {
    pub fn new(events: Vec<HistoryEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn close_event(&self) -> Option<&HistoryEvent> {
        self.events.last().filter(|e| e.attributes.is_close_event())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::from_secs(u64::MAX)), u64::MAX);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_history_json_shape() {
        let history = WorkflowHistory::new(vec![
            HistoryEvent {
                event_id: 1,
                timestamp: Utc::now(),
                attributes: EventAttributes::DequeueTimedOut {
                    queue: "cancel".into(),
                    timeout_ms: 1000,
                },
            },
            HistoryEvent {
                event_id: 2,
                timestamp: Utc::now(),
                attributes: EventAttributes::WorkflowExecutionCompleted {
                    result: serde_json::json!(true),
                },
            },
        ]);

        let json = history.to_json().unwrap();
        assert!(json.contains("\"event_type\": \"DequeueTimedOut\""));
        assert_eq!(WorkflowHistory::from_json(&json).unwrap(), history);
        assert_eq!(history.close_event().map(|e| e.event_id), Some(2));
    }
}
