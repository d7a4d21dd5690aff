//! Task status and the transitions allowed between states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Task.
///
/// ```text
/// Queued ──► Running ──► Completed | Failed | Cancelled | TimedOut
///   │
///   ├──► Cancelled   (cancelled before admission)
///   └──► Failed      (workspace could not be created at admission)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task accepted and waiting for a free execution slot.
    #[default]
    Queued,
    /// A runner is executing the pipeline for this task.
    Running,
    /// All stages succeeded.
    Completed,
    /// A stage failed with an unrecoverable error.
    Failed,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
    /// The per-task deadline elapsed before the pipeline finished.
    TimedOut,
}

impl TaskStatus {
    /// Every status, in state-machine order.
    pub const ALL: [TaskStatus; 6] = [
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::TimedOut,
    ];

    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Returns true if moving from `self` to `next` is permitted.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running | Self::Cancelled | Self::Failed) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Lowercase name used in logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
