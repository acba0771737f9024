//! Queue domain types: state machine, configuration, statistics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Current operational state of a work queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum QueueState {
    /// Constructed but never started.
    #[default]
    Idle = 0,
    /// Dispatching work.
    Processing = 1,
    /// Pause gate closed; in-flight items run to completion.
    Paused = 2,
    /// Stop requested; waiting for in-flight items to report back.
    PendingStop = 3,
    /// Dispatch halted; may be started again.
    Stopped = 4,
    /// Killed. Terminal; the dispatcher is gone.
    Killed = 5,
}

impl QueueState {
    /// Whether the queue can still be driven.
    pub fn is_alive(&self) -> bool {
        !matches!(self, QueueState::Killed)
    }

    /// Whether the dispatch loop is pulling items.
    pub fn is_processing(&self) -> bool {
        matches!(self, QueueState::Processing)
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Idle => "idle",
            QueueState::Processing => "processing",
            QueueState::Paused => "paused",
            QueueState::PendingStop => "pending_stop",
            QueueState::Stopped => "stopped",
            QueueState::Killed => "killed",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`QueueState::as_u8`]; unknown values map to `Killed`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => QueueState::Idle,
            1 => QueueState::Processing,
            2 => QueueState::Paused,
            3 => QueueState::PendingStop,
            4 => QueueState::Stopped,
            _ => QueueState::Killed,
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for queue behavior, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Human-readable name, used in logs and actor names.
    pub name: String,
    /// Maximum number of work items executing concurrently.
    pub throttle: u32,
    /// Maximum attempts per item before it is abandoned.
    pub attempts: u32,
    /// Per-item wait bound applied by the dispatcher. An expired wait counts
    /// as a failed attempt; the underlying task is left running.
    pub item_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "work-queue".to_string(),
            throttle: 4,
            attempts: 3,
            item_timeout: None,
        }
    }
}

impl QueueConfig {
    /// Create a config with the given name and defaults otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_throttle(mut self, throttle: u32) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }
}

/// Point-in-time statistics for a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Items waiting to be dispatched.
    pub pending: usize,
    /// Items currently executing.
    pub in_flight: usize,
    /// Terminal outcomes seen since the last reset, success or final failure.
    pub total_processed: u64,
}

impl QueueStats {
    /// Items the queue is still responsible for.
    pub fn active(&self) -> usize {
        self.pending + self.in_flight
    }
}
