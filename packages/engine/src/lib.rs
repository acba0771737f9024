//! Execution runtime for the background-work engine.
//!
//! This crate provides the Ractor-based dispatcher behind [`WorkQueue`] and
//! the periodic schedulers [`RecurringTask`] and [`AsyncRecurringTask`].
//!
//! # Architecture
//!
//! - `WorkQueue` - public handle; one dedicated dispatcher actor per queue
//! - `QueueActor` - owns the FIFO queue, throttle slots and retry policy
//! - `RecurringTask` - fixed-period firing with overlap skipping
//! - `AsyncRecurringTask` - periodic state machine with events and timeouts
//!
//! # Usage
//!
//! ```ignore
//! use engine::WorkQueue;
//! use work_core::{QueueConfig, WorkItem};
//!
//! let queue = WorkQueue::spawn(QueueConfig::new("ingest").with_throttle(2)).await?;
//! let mut events = queue.subscribe();
//! queue.start().await?;
//! queue.enqueue(WorkItem::new(|| async { Ok(serde_json::json!("done")) }))?;
//! ```

mod async_recurring;
mod messages;
mod queue_actor;
mod recurring;
mod work_queue;

pub use async_recurring::{AsyncRecurringTask, FnRecurring, Recurring, RecurringError};
pub use messages::{QueueError, QueueMessage};
pub use queue_actor::QueueActor;
pub use recurring::RecurringTask;
pub use work_queue::WorkQueue;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
