//! Core domain errors.

use thiserror::Error;

/// Core domain errors for ClipRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No room left to track another task.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Failure reported by one pipeline collaborator call.
///
/// Collaborators retry transient problems inside their own boundary; by the
/// time one of these reaches the runner the stage is considered terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("transcription timed out: {0}")]
    TranscriptionTimeout(String),

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("clip cutting failed: {0}")]
    CutFailed(String),

    #[error("subtitle rendering failed: {0}")]
    RenderFailed(String),

    /// The collaborator noticed the task's cancellation token and stopped.
    #[error("stage cancelled")]
    Cancelled,
}

impl StageError {
    /// Returns true if the collaborator gave up because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
