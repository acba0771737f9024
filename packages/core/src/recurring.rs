//! Recurring-task domain types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of a periodic scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RecurringState {
    /// Constructed but never started.
    #[default]
    Idle = 0,
    /// Timer armed, waiting for the next tick.
    Running = 1,
    /// An invocation is currently executing.
    Processing = 2,
    /// Reserved; pausing is not supported.
    Paused = 3,
    /// Timer cancelled. Terminal.
    Stopped = 4,
}

impl RecurringState {
    pub fn is_alive(&self) -> bool {
        !matches!(self, RecurringState::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringState::Idle => "idle",
            RecurringState::Running => "running",
            RecurringState::Processing => "processing",
            RecurringState::Paused => "paused",
            RecurringState::Stopped => "stopped",
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`RecurringState::as_u8`]; unknown values map to `Stopped`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RecurringState::Idle,
            1 => RecurringState::Running,
            2 => RecurringState::Processing,
            3 => RecurringState::Paused,
            _ => RecurringState::Stopped,
        }
    }
}

impl fmt::Display for RecurringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
