//! Progress events published while a task moves through the pipeline.

use crate::task::{TaskError, TaskResult};
use crate::{Stage, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One progress notification for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Task this event belongs to.
    pub task_id: TaskId,
    /// Per-task sequence number, assigned when the event is published.
    pub seq: u64,
    /// Unix timestamp (milliseconds) when the event was created.
    pub timestamp_ms: i64,
    /// What happened.
    pub kind: ProgressKind,
}

impl ProgressEvent {
    /// Create a new event. `seq` is filled in by the publisher.
    pub fn new(task_id: TaskId, kind: ProgressKind) -> Self {
        Self {
            task_id,
            seq: 0,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            kind,
        }
    }

    /// Create a Started event.
    pub fn started(task_id: TaskId, workspace: PathBuf) -> Self {
        Self::new(task_id, ProgressKind::Started { workspace })
    }

    /// Create a StageStarted event. `input` is set for per-video stages.
    pub fn stage_started(task_id: TaskId, stage: Stage, input: Option<&str>) -> Self {
        Self::new(
            task_id,
            ProgressKind::StageStarted {
                stage,
                input: input.map(str::to_string),
            },
        )
    }

    /// Create a StageCompleted event.
    pub fn stage_completed(task_id: TaskId, stage: Stage, input: Option<&str>) -> Self {
        Self::new(
            task_id,
            ProgressKind::StageCompleted {
                stage,
                input: input.map(str::to_string),
            },
        )
    }

    /// Create an InputSkipped event.
    pub fn input_skipped(task_id: TaskId, input: &str, stage: Stage, reason: &str) -> Self {
        Self::new(
            task_id,
            ProgressKind::InputSkipped {
                input: input.to_string(),
                stage,
                reason: reason.to_string(),
            },
        )
    }

    /// Create an AnalysisDegraded event.
    pub fn analysis_degraded(task_id: TaskId, reason: &str) -> Self {
        Self::new(
            task_id,
            ProgressKind::AnalysisDegraded {
                reason: reason.to_string(),
            },
        )
    }

    /// Create a SubtitlesSkipped event.
    pub fn subtitles_skipped(task_id: TaskId, reason: &str) -> Self {
        Self::new(
            task_id,
            ProgressKind::SubtitlesSkipped {
                reason: reason.to_string(),
            },
        )
    }

    /// Create the terminal event for a task that reached `status`.
    pub fn terminal(
        task_id: TaskId,
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<TaskError>,
    ) -> Self {
        Self::new(
            task_id,
            ProgressKind::Terminal {
                status,
                result,
                error,
            },
        )
    }

    /// Returns true for the last event a task ever publishes.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Terminal { .. })
    }
}

/// Type of progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    /// Task admitted; its workspace exists.
    Started { workspace: PathBuf },
    /// A stage is about to run.
    StageStarted {
        stage: Stage,
        input: Option<String>,
    },
    /// A stage returned usable output.
    StageCompleted {
        stage: Stage,
        input: Option<String>,
    },
    /// A per-video stage failed; the input is dropped from the rest of the run.
    InputSkipped {
        input: String,
        stage: Stage,
        reason: String,
    },
    /// Analysis failed and the default selection was used instead.
    AnalysisDegraded { reason: String },
    /// Subtitle rendering failed and the plain video was kept.
    SubtitlesSkipped { reason: String },
    /// Task reached a terminal status. Always the last event.
    Terminal {
        status: TaskStatus,
        result: Option<TaskResult>,
        error: Option<TaskError>,
    },
}
