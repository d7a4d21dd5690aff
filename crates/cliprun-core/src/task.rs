//! Task record and the values attached to its terminal states.

use crate::{CoreError, Stage, TaskId, TaskStatus, VideoInput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A Task represents one end-to-end pipeline execution over one or more
/// input videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Current task status.
    pub status: TaskStatus,

    /// Source videos in submission order.
    pub inputs: Vec<VideoInput>,

    /// Caller-supplied options.
    pub options: TaskOptions,

    /// Task directory, set when the task is admitted.
    pub workspace: Option<PathBuf>,

    /// When the task was submitted.
    pub created_at: DateTime<Utc>,

    /// When the task was admitted (transitioned to Running).
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Final artifact, present only on Completed.
    pub result: Option<TaskResult>,

    /// Failure description, present only on Failed and TimedOut.
    pub error: Option<TaskError>,

    /// Set once a caller asks for cancellation.
    pub cancel_requested: bool,

    /// Stage the runner is executing or last started.
    pub current_stage: Option<Stage>,

    /// Inputs dropped by a per-video stage failure.
    pub skipped_inputs: Vec<SkippedInput>,
}

impl Task {
    /// Create a new Task in `Queued`.
    pub fn new(inputs: Vec<VideoInput>, options: TaskOptions) -> Self {
        Self {
            id: TaskId::generate(),
            status: TaskStatus::Queued,
            inputs,
            options,
            workspace: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            cancel_requested: false,
            current_stage: None,
            skipped_inputs: Vec::new(),
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping `started_at` or `finished_at`.
    ///
    /// Rejects any move the state machine does not allow, which also makes
    /// every timestamp settable only once.
    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        } else if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Human-readable one-line summary of where the task stands.
    pub fn summary(&self) -> String {
        match (&self.status, &self.result, &self.error) {
            (TaskStatus::Completed, Some(result), _) => {
                format!("completed: {} ({} clips)", result.output.display(), result.clip_count)
            }
            (_, _, Some(error)) => format!("{}: {}", self.status, error),
            (TaskStatus::Running, _, _) => match self.current_stage {
                Some(stage) => format!("running ({stage})"),
                None => "running".to_string(),
            },
            (status, _, _) => status.to_string(),
        }
    }
}

/// Options supplied with a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Extra instructions appended to the analysis prompt.
    pub prompt: Option<String>,

    /// Burn subtitles into the merged video.
    pub captions: bool,
}

impl TaskOptions {
    /// Builder method to set the analysis hint.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Builder method to enable subtitles.
    pub fn with_captions(mut self, captions: bool) -> Self {
        self.captions = captions;
        self
    }
}

/// Result of a Completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Final video inside the task workspace.
    pub output: PathBuf,

    /// Number of clips merged into `output`.
    pub clip_count: usize,

    /// True when the default selection replaced a failed analysis.
    pub used_default_selection: bool,

    /// True when subtitles were requested but the plain video was kept.
    pub subtitles_skipped: bool,
}

impl TaskResult {
    pub fn new(output: impl Into<PathBuf>, clip_count: usize) -> Self {
        Self {
            output: output.into(),
            clip_count,
            used_default_selection: false,
            subtitles_skipped: false,
        }
    }
}

/// Structured failure carried by Failed and TimedOut tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Stage that failed or was active when the deadline passed.
    pub stage: Option<Stage>,

    /// Underlying cause.
    pub message: String,
}

impl TaskError {
    pub fn new(stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Failure attributed to `stage`.
    pub fn at(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(Some(stage), message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "stage '{}' failed: {}", stage, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TaskError {}

/// An input that a per-video stage could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInput {
    /// Input name.
    pub input: String,
    pub stage: Stage,
    pub reason: String,
}

impl SkippedInput {
    pub fn new(input: impl Into<String>, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            stage,
            reason: reason.into(),
        }
    }
}
