//! Orchestrator errors.

use cliprun_core::{TaskId, TaskStatus};
use thiserror::Error;

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("a task needs at least one input video")]
    EmptyInputs,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("the scheduler is shutting down")]
    ShuttingDown,
}

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("submission rejected: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task still active: {0}")]
    StillActive(TaskId),

    /// A move the state machine forbids. Indicates a bug in the caller.
    #[error("Invalid state transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
