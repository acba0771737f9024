//! Core domain types for the background-execution engine.
//!
//! This crate contains shared types used across all packages:
//! - WorkItem and WorkState for units of deferred work
//! - QueueState, QueueConfig and QueueStats for the dispatcher
//! - RecurringState for periodic schedulers
//! - Events and the error taxonomy

mod error;
mod events;
mod item;
mod queue;
mod recurring;

pub use error::{BoxError, WorkError};
pub use events::{QueueEvent, RecurringEvent};
pub use item::{WorkFn, WorkFuture, WorkItem, WorkSnapshot, WorkState};
pub use queue::{QueueConfig, QueueState, QueueStats};
pub use recurring::RecurringState;
