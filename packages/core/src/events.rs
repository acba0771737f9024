//! Event types emitted by the execution engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::WorkError;
use crate::item::WorkSnapshot;
use crate::queue::QueueState;

/// Events emitted by a work queue over its broadcast channel.
///
/// Errors are carried as `Arc<WorkError>` so every observer sees the same
/// underlying cause; events are therefore `Clone + Debug` but not serialized
/// (no wire format exists for work items).
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// The dispatch loop began processing.
    Started { timestamp: DateTime<Utc> },
    /// The queue moved between lifecycle states.
    StateChanged {
        old_state: QueueState,
        new_state: QueueState,
        timestamp: DateTime<Utc>,
    },
    /// One or more items were appended.
    ItemsAdded {
        count: usize,
        timestamp: DateTime<Utc>,
    },
    /// An item was dispatched to a task.
    ItemStarted {
        tag: Option<String>,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// An item reached a terminal outcome, success or final failure.
    ItemProcessed {
        item: WorkSnapshot,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed. Fires for every failed attempt, including ones
    /// that are subsequently retried.
    ItemFailed {
        tag: Option<String>,
        error: Arc<WorkError>,
        attempt: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A failed item was re-enqueued at the tail.
    ItemRetrying {
        tag: Option<String>,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// The pending queue drained (items may still be in flight).
    QueueEmpty { timestamp: DateTime<Utc> },
    /// A stop was requested.
    Stopping { timestamp: DateTime<Utc> },
    /// The dispatch loop halted.
    Stopped { timestamp: DateTime<Utc> },
    /// The queue was killed and its dispatcher torn down.
    Killed { timestamp: DateTime<Utc> },
}

impl QueueEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::Started { timestamp } => *timestamp,
            QueueEvent::StateChanged { timestamp, .. } => *timestamp,
            QueueEvent::ItemsAdded { timestamp, .. } => *timestamp,
            QueueEvent::ItemStarted { timestamp, .. } => *timestamp,
            QueueEvent::ItemProcessed { timestamp, .. } => *timestamp,
            QueueEvent::ItemFailed { timestamp, .. } => *timestamp,
            QueueEvent::ItemRetrying { timestamp, .. } => *timestamp,
            QueueEvent::QueueEmpty { timestamp } => *timestamp,
            QueueEvent::Stopping { timestamp } => *timestamp,
            QueueEvent::Stopped { timestamp } => *timestamp,
            QueueEvent::Killed { timestamp } => *timestamp,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        fn tagged(tag: &Option<String>) -> &str {
            tag.as_deref().unwrap_or("<untagged>")
        }

        match self {
            QueueEvent::Started { .. } => "queue started".to_string(),
            QueueEvent::StateChanged {
                old_state,
                new_state,
                ..
            } => format!("queue {} -> {}", old_state, new_state),
            QueueEvent::ItemsAdded { count, .. } => format!("{} item(s) added", count),
            QueueEvent::ItemStarted { tag, attempt, .. } => {
                format!("item {} started (attempt {})", tagged(tag), attempt)
            }
            QueueEvent::ItemProcessed { item, .. } => {
                format!("item {} processed: {}", tagged(&item.tag), item.state)
            }
            QueueEvent::ItemFailed {
                tag,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("item {} failed: {}{}", tagged(tag), error, retry)
            }
            QueueEvent::ItemRetrying { tag, attempt, .. } => {
                format!("item {} retrying (attempt {})", tagged(tag), attempt)
            }
            QueueEvent::QueueEmpty { .. } => "queue empty".to_string(),
            QueueEvent::Stopping { .. } => "queue stopping".to_string(),
            QueueEvent::Stopped { .. } => "queue stopped".to_string(),
            QueueEvent::Killed { .. } => "queue killed".to_string(),
        }
    }
}

/// Events emitted by a periodic scheduler.
#[derive(Debug, Clone)]
pub enum RecurringEvent {
    /// A tick began; the operation is being invoked.
    Updating { timestamp: DateTime<Utc> },
    /// An invocation completed and was accepted as fresh.
    Completed {
        result: Value,
        timestamp: DateTime<Utc>,
    },
    /// An invocation failed; carries the original cause.
    Error {
        error: Arc<WorkError>,
        timestamp: DateTime<Utc>,
    },
    /// The scheduler was stopped.
    Stopped { timestamp: DateTime<Utc> },
}

impl RecurringEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RecurringEvent::Updating { timestamp } => *timestamp,
            RecurringEvent::Completed { timestamp, .. } => *timestamp,
            RecurringEvent::Error { timestamp, .. } => *timestamp,
            RecurringEvent::Stopped { timestamp } => *timestamp,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            RecurringEvent::Updating { .. } => "updating".to_string(),
            RecurringEvent::Completed { .. } => "completed".to_string(),
            RecurringEvent::Error { error, .. } => format!("error: {}", error),
            RecurringEvent::Stopped { .. } => "stopped".to_string(),
        }
    }
}
