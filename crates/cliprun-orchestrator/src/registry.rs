//! Task Registry: the authoritative in-memory store of task records.
//!
//! The map is guarded by an `RwLock` that is held only long enough to look up
//! or insert an entry; every entry has its own `Mutex`, so mutations are
//! serialized per task and readers never observe a half-applied transition.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use cliprun_core::{SkippedInput, Stage, Task, TaskError, TaskId, TaskOptions, TaskResult, TaskStatus, VideoInput};

use crate::error::{OrchestratorError, Result, SubmissionError};

/// A state change together with the fields it sets.
#[derive(Debug, Clone)]
pub enum Transition {
    /// `Queued -> Running`; the workspace has been created.
    Start { workspace: PathBuf },
    /// `Running -> Completed`.
    Complete(TaskResult),
    /// `-> Failed`.
    Fail(TaskError),
    /// `-> Cancelled`.
    Cancel,
    /// `Running -> TimedOut`.
    TimeOut(TaskError),
}

impl Transition {
    /// Status this transition moves the task to.
    pub fn target(&self) -> TaskStatus {
        match self {
            Self::Start { .. } => TaskStatus::Running,
            Self::Complete(_) => TaskStatus::Completed,
            Self::Fail(_) => TaskStatus::Failed,
            Self::Cancel => TaskStatus::Cancelled,
            Self::TimeOut(_) => TaskStatus::TimedOut,
        }
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// Flag set; the task will stop at its next stage boundary.
    Requested,
    /// The task had already reached a terminal state; nothing changed.
    AlreadyTerminal,
}

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
}

/// Thread-safe store of task records keyed by [`TaskId`].
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskEntry>>>>,
    capacity: usize,
}

impl TaskRegistry {
    /// Create a registry holding at most `capacity` task records.
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Allocate a new task in `Queued`.
    pub async fn create(&self, inputs: Vec<VideoInput>, options: TaskOptions) -> Result<TaskId> {
        let task = Task::new(inputs, options);
        let id = task.id.clone();

        let mut tasks = self.tasks.write().await;
        if tasks.len() >= self.capacity {
            return Err(SubmissionError::ResourceExhausted(format!(
                "registry already tracks {} tasks",
                tasks.len()
            ))
            .into());
        }
        tasks.insert(
            id.clone(),
            Arc::new(Mutex::new(TaskEntry {
                task,
                cancel: CancellationToken::new(),
            })),
        );

        debug!(task_id = %id, tracked = tasks.len(), "Task record created");
        Ok(id)
    }

    async fn entry(&self, id: &TaskId) -> Result<Arc<Mutex<TaskEntry>>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))
    }

    /// Consistent snapshot of one task.
    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        let entry = self.entry(id).await?;
        let entry = entry.lock().await;
        Ok(entry.task.clone())
    }

    /// Atomically apply `transition`, returning the updated snapshot.
    ///
    /// Moves the state machine forbids are rejected with
    /// [`OrchestratorError::InvalidTransition`] and leave the task untouched.
    pub async fn transition(&self, id: &TaskId, transition: Transition) -> Result<Task> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        let task = &mut entry.task;

        let from = task.status;
        let to = transition.target();
        task.transition_to(to)
            .map_err(|_| OrchestratorError::InvalidTransition {
                task_id: id.clone(),
                from,
                to,
            })?;

        match transition {
            Transition::Start { workspace } => task.workspace = Some(workspace),
            Transition::Complete(result) => task.result = Some(result),
            Transition::Fail(error) | Transition::TimeOut(error) => task.error = Some(error),
            Transition::Cancel => {}
        }

        info!(task_id = %id, from = %from, to = %to, "Task status changed");
        Ok(task.clone())
    }

    /// Set `cancel_requested` and fire the task's cancellation token.
    pub async fn request_cancel(&self, id: &TaskId) -> Result<CancelRequest> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.task.is_terminal() {
            return Ok(CancelRequest::AlreadyTerminal);
        }
        entry.task.cancel_requested = true;
        entry.cancel.cancel();
        info!(task_id = %id, status = %entry.task.status, "Cancellation requested");
        Ok(CancelRequest::Requested)
    }

    /// Token the runner and its collaborators watch for cancellation.
    pub async fn cancel_token(&self, id: &TaskId) -> Result<CancellationToken> {
        let entry = self.entry(id).await?;
        let entry = entry.lock().await;
        Ok(entry.cancel.clone())
    }

    /// Record the stage a running task has entered.
    pub async fn record_stage(&self, id: &TaskId, stage: Stage) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        if entry.task.status == TaskStatus::Running {
            entry.task.current_stage = Some(stage);
        }
        Ok(())
    }

    /// Record an input dropped by a per-video stage failure.
    pub async fn record_skipped(&self, id: &TaskId, skipped: SkippedInput) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut entry = entry.lock().await;
        entry.task.skipped_inputs.push(skipped);
        Ok(())
    }

    /// Snapshots of all tasks, optionally filtered by status, oldest first.
    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let entries: Vec<_> = self.tasks.read().await.values().cloned().collect();

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.lock().await;
            if status.map_or(true, |s| entry.task.status == s) {
                tasks.push(entry.task.clone());
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Ids of terminal tasks that finished before `cutoff`.
    pub async fn finished_before(&self, cutoff: DateTime<Utc>) -> Vec<TaskId> {
        self.list(None)
            .await
            .into_iter()
            .filter(|t| t.is_terminal() && t.finished_at.is_some_and(|f| f < cutoff))
            .map(|t| t.id)
            .collect()
    }

    /// Remove a terminal task, returning its final snapshot.
    ///
    /// Fails with [`OrchestratorError::StillActive`] if the task has not
    /// reached a terminal state.
    pub async fn evict(&self, id: &TaskId) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;
        let entry = entry.lock().await;
        if !entry.task.is_terminal() {
            return Err(OrchestratorError::StillActive(id.clone()));
        }
        tasks.remove(id);
        debug!(task_id = %id, status = %entry.task.status, "Task record evicted");
        Ok(entry.task.clone())
    }

    /// Number of tracked tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
