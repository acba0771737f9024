//! Message types for the queue dispatcher actor.

use ractor::RpcReplyPort;
use serde_json::Value;
use work_core::{QueueState, WorkError, WorkItem};

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Append items at the tail and wake the dispatcher.
    Enqueue { items: Vec<WorkItem> },

    /// Begin (or resume) dispatching.
    Start {
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Close the pause gate; in-flight items run to completion.
    Pause {
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Request the dispatch loop exit.
    Stop {
        reply: RpcReplyPort<Result<(), QueueError>>,
    },

    /// Stop, clear the queue, reset counters and tear the dispatcher down.
    Kill { reply: RpcReplyPort<()> },

    /// Clear pending items and the processed count.
    Reset { reply: RpcReplyPort<()> },

    /// Internal: a dispatched item reported back.
    ItemFinished {
        item: WorkItem,
        outcome: Result<Value, WorkError>,
    },
}

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("throttle must be at least 1")]
    InvalidThrottle,

    #[error("attempts must be at least 1")]
    InvalidAttempts,

    #[error("operation not valid while {0}")]
    InvalidState(QueueState),

    #[error("failed to spawn dispatcher: {0}")]
    Spawn(String),

    #[error("queue dispatcher is gone: {0}")]
    Closed(String),
}

impl QueueError {
    pub(crate) fn closed(detail: impl std::fmt::Display) -> Self {
        QueueError::Closed(detail.to_string())
    }
}
