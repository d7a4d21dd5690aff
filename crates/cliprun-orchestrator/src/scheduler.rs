//! Task scheduler - admission control for pipeline runners.
//!
//! At most `max_concurrent_tasks` runners execute at once. A slot is reserved
//! under the scheduler lock before the task is moved to `Running`, so the
//! number of running tasks can never exceed the ceiling. Excess submissions
//! wait in a FIFO queue and are admitted in submission order as slots free up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cliprun_core::{Stage, TaskError, TaskId, TaskStatus};

use crate::config::Config;
use crate::error::{OrchestratorError, Result, SubmissionError};
use crate::progress::ProgressHub;
use crate::registry::{CancelRequest, TaskRegistry, Transition};
use crate::runner::{commit_terminal, PipelineRunner};
use crate::workspace::Workspace;

/// Acknowledgement returned by [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The task was still queued and is now `Cancelled`.
    Cancelled,
    /// The task is running; it stops at its next stage boundary.
    Requested,
    /// The task had already finished; nothing changed.
    AlreadyTerminal,
}

struct SchedulerState {
    /// Reserved execution slots, including tasks still being admitted.
    running: usize,
    queue: VecDeque<TaskId>,
    accepting: bool,
    handles: HashMap<TaskId, JoinHandle<()>>,
}

struct Inner {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressHub>,
    runner: PipelineRunner,
    state: Mutex<SchedulerState>,
    idle: Notify,
}

/// Task scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a new Scheduler.
    pub fn new(
        config: Arc<Config>,
        registry: Arc<TaskRegistry>,
        progress: Arc<ProgressHub>,
        runner: PipelineRunner,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                progress,
                runner,
                state: Mutex::new(SchedulerState {
                    running: 0,
                    queue: VecDeque::new(),
                    accepting: true,
                    handles: HashMap::new(),
                }),
                idle: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit `task_id` now if a slot is free, otherwise queue it.
    ///
    /// When this returns for an admitted task, the task is already `Running`
    /// (or terminal, if its workspace could not be created).
    pub async fn submit(&self, task_id: TaskId) -> Result<()> {
        let admit = {
            let mut state = self.state();
            if !state.accepting {
                return Err(SubmissionError::ShuttingDown.into());
            }
            if state.running < self.inner.config.max_concurrent_tasks {
                state.running += 1;
                true
            } else {
                state.queue.push_back(task_id.clone());
                info!(task_id = %task_id, queue_depth = state.queue.len(), "Task queued");
                false
            }
        };

        if admit {
            self.start(task_id).await;
        }
        Ok(())
    }

    /// Start a runner for a task that already holds a reserved slot.
    ///
    /// Boxed because a finishing runner admits the next task through this
    /// same path.
    fn start(&self, task_id: TaskId) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            match this.try_start(&task_id).await {
                Ok(true) => {}
                Ok(false) => this.release_slot().await,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Admission failed");
                    this.release_slot().await;
                }
            }
        }
        .boxed()
    }

    /// Returns false if the task was settled without starting a runner.
    async fn try_start(&self, task_id: &TaskId) -> Result<bool> {
        let inner = &self.inner;
        let task = inner.registry.get(task_id).await?;

        if task.cancel_requested {
            commit_terminal(&inner.registry, &inner.progress, task_id, Transition::Cancel).await;
            return Ok(false);
        }

        let workspace = match self.prepare_workspace(task_id).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Could not create workspace");
                let error = TaskError::at(Stage::Workspace, e.to_string());
                commit_terminal(&inner.registry, &inner.progress, task_id, Transition::Fail(error))
                    .await;
                return Ok(false);
            }
        };

        inner
            .registry
            .transition(
                task_id,
                Transition::Start {
                    workspace: workspace.root().to_path_buf(),
                },
            )
            .await?;
        let cancel = inner.registry.cancel_token(task_id).await?;

        let this = self.clone();
        let id = task_id.clone();
        let admitted = {
            let mut state = self.state();
            if state.accepting {
                let handle = tokio::spawn(async move {
                    this.inner.runner.run(id.clone(), workspace, cancel).await;
                    this.on_runner_finished(&id).await;
                });
                state.handles.insert(task_id.clone(), handle);
                info!(task_id = %task_id, running = state.running, "Task admitted");
                true
            } else {
                false
            }
        };

        if !admitted {
            // Shutdown began while the workspace was being prepared and will
            // not see this task, so settle it here.
            inner.registry.request_cancel(task_id).await?;
            commit_terminal(&inner.registry, &inner.progress, task_id, Transition::Cancel).await;
        }
        Ok(admitted)
    }

    async fn prepare_workspace(&self, task_id: &TaskId) -> Result<Workspace> {
        let task = self.inner.registry.get(task_id).await?;
        let workspace = Workspace::create(&self.inner.config.output_dir, task_id).await?;
        workspace
            .write_info(task_id, &task.inputs, &task.options)
            .await?;
        Ok(workspace)
    }

    /// Release the finished runner's slot and admit the next queued task.
    pub async fn on_runner_finished(&self, task_id: &TaskId) {
        self.state().handles.remove(task_id);
        self.release_slot().await;
    }

    async fn release_slot(&self) {
        let next = {
            let mut state = self.state();
            state.running = state.running.saturating_sub(1);
            let next = if state.accepting {
                state.queue.pop_front()
            } else {
                None
            };
            if next.is_some() {
                state.running += 1;
            }
            if state.running == 0 {
                self.inner.idle.notify_waiters();
            }
            next
        };

        if let Some(next) = next {
            info!(task_id = %next, "Admitting next queued task");
            self.start(next).await;
        }
    }

    /// Cancel a task. Queued tasks go straight to `Cancelled`; running tasks
    /// are asked to stop at their next stage boundary.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<CancelAck> {
        let inner = &self.inner;
        if inner.registry.request_cancel(task_id).await? == CancelRequest::AlreadyTerminal {
            return Ok(CancelAck::AlreadyTerminal);
        }

        let was_queued = {
            let mut state = self.state();
            match state.queue.iter().position(|id| id == task_id) {
                Some(pos) => {
                    state.queue.remove(pos);
                    true
                }
                None => false,
            }
        };

        if was_queued {
            commit_terminal(&inner.registry, &inner.progress, task_id, Transition::Cancel).await;
            info!(task_id = %task_id, "Queued task cancelled");
            return Ok(CancelAck::Cancelled);
        }
        Ok(CancelAck::Requested)
    }

    /// Number of tasks waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        self.state().queue.len()
    }

    /// Number of reserved execution slots.
    pub fn running_count(&self) -> usize {
        self.state().running
    }

    pub fn is_accepting(&self) -> bool {
        self.state().accepting
    }

    /// Stop admitting, cancel everything, and wait for runners to finish.
    ///
    /// Queued tasks become `Cancelled` immediately. Running tasks get the
    /// configured grace period to reach a stage boundary; any still running
    /// after that are aborted and forced to `Cancelled`.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let queued: Vec<TaskId> = {
            let mut state = self.state();
            state.accepting = false;
            state.queue.drain(..).collect()
        };
        info!(queued = queued.len(), "Scheduler shutting down");

        for id in &queued {
            let _ = inner.registry.request_cancel(id).await;
            commit_terminal(&inner.registry, &inner.progress, id, Transition::Cancel).await;
        }

        for task in inner.registry.list(Some(TaskStatus::Running)).await {
            let _ = inner.registry.request_cancel(&task.id).await;
        }

        let grace = inner.config.shutdown_grace;
        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            info!("All runners finished");
            return;
        }

        let stragglers: Vec<(TaskId, JoinHandle<()>)> = {
            let mut state = self.state();
            let stragglers: Vec<_> = state.handles.drain().collect();
            state.running = state.running.saturating_sub(stragglers.len());
            stragglers
        };
        for (id, handle) in stragglers {
            handle.abort();
            warn!(task_id = %id, grace_secs = grace.as_secs(), "Runner did not stop in time, forcing cancellation");
            commit_terminal(&inner.registry, &inner.progress, &id, Transition::Cancel).await;
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.state().running == 0 {
                return;
            }
            notified.await;
        }
    }
}
