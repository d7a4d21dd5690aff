//! `ClipService`: the interface a transport or CLI layer drives.
//!
//! Owns the registry, the progress hub and the scheduler, and wires them to
//! one set of collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cliprun_core::input::is_supported_video;
use cliprun_core::{ProgressEvent, Task, TaskId, TaskOptions, TaskStatus, VideoInput};

use crate::config::Config;
use crate::error::{OrchestratorError, Result, SubmissionError};
use crate::metrics::collect_metrics;
use crate::progress::{replay, ProgressHub, ProgressStream};
use crate::registry::{TaskRegistry, Transition};
use crate::retention;
use crate::runner::{commit_terminal, PipelineRunner};
use crate::scheduler::{CancelAck, Scheduler};
use crate::stages::Collaborators;

/// Highlight-clip task service.
pub struct ClipService {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressHub>,
    scheduler: Scheduler,
    sweeper: CancellationToken,
}

impl ClipService {
    /// Create a new ClipService.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(TaskRegistry::new(config.max_tracked_tasks));
        let progress = Arc::new(ProgressHub::new());
        let runner = PipelineRunner::new(
            registry.clone(),
            progress.clone(),
            Arc::new(collaborators),
            config.clone(),
        );
        let scheduler = Scheduler::new(config.clone(), registry.clone(), progress.clone(), runner);

        Self {
            config,
            registry,
            progress,
            scheduler,
            sweeper: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate `inputs`, record a new task and hand it to the scheduler.
    ///
    /// The task is `Running` on return if a slot was free, `Queued`
    /// otherwise.
    pub async fn submit_task(&self, inputs: Vec<VideoInput>, options: TaskOptions) -> Result<TaskId> {
        validate_inputs(&inputs).await?;
        if !self.scheduler.is_accepting() {
            return Err(SubmissionError::ShuttingDown.into());
        }

        let input_count = inputs.len();
        let task_id = self.registry.create(inputs, options).await?;
        self.progress.open(&task_id).await;
        info!(task_id = %task_id, inputs = input_count, "Task submitted");

        if let Err(e) = self.scheduler.submit(task_id.clone()).await {
            // Shutdown started after the check above. Nobody has seen this id.
            commit_terminal(&self.registry, &self.progress, &task_id, Transition::Cancel).await;
            let _ = self.registry.evict(&task_id).await;
            return Err(e);
        }
        Ok(task_id)
    }

    /// Consistent snapshot of one task.
    pub async fn get_status(&self, task_id: &TaskId) -> Result<Task> {
        self.registry.get(task_id).await
    }

    /// Cancel a task. Idempotent for terminal tasks.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<CancelAck> {
        let ack = self.scheduler.cancel(task_id).await?;
        info!(task_id = %task_id, ack = ?ack, "Cancellation requested");
        Ok(ack)
    }

    /// Stream of progress events for a task, ending with its terminal event.
    ///
    /// Subscribers arriving after the task finished get the terminal event
    /// alone.
    pub async fn subscribe_progress(&self, task_id: &TaskId) -> Result<ProgressStream> {
        if let Some(stream) = self.progress.subscribe(task_id).await {
            return Ok(stream);
        }
        let task = self.registry.get(task_id).await?;
        Ok(replay(ProgressEvent::terminal(
            task.id,
            task.status,
            task.result,
            task.error,
        )))
    }

    /// Snapshots of all tracked tasks, oldest first.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.registry.list(status).await
    }

    /// Wait until the task reaches a terminal state and return its snapshot.
    pub async fn wait_for_terminal(&self, task_id: &TaskId) -> Result<Task> {
        let mut stream = self.subscribe_progress(task_id).await?;
        while let Some(event) = stream.next().await {
            if event.is_terminal() {
                break;
            }
        }
        self.registry.get(task_id).await
    }

    /// Drop a finished task and apply the workspace retention policy.
    pub async fn release(&self, task_id: &TaskId) -> Result<Task> {
        retention::evict_task(&self.registry, &self.config, task_id).await
    }

    /// Prometheus text for the current state.
    pub async fn metrics(&self) -> String {
        collect_metrics(&self.registry, &self.scheduler).await
    }

    /// Evict expired tasks every `period` until [`ClipService::shutdown`].
    pub fn spawn_retention_sweeper(&self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(retention::run_sweeper(
            self.registry.clone(),
            self.config.clone(),
            period,
            self.sweeper.clone(),
        ))
    }

    /// Stop accepting work, cancel everything, and wait for runners.
    pub async fn shutdown(&self) {
        self.sweeper.cancel();
        self.scheduler.shutdown().await;
    }
}

async fn validate_inputs(inputs: &[VideoInput]) -> Result<()> {
    if inputs.is_empty() {
        return Err(SubmissionError::EmptyInputs.into());
    }

    let mut stems = HashSet::new();
    for input in inputs {
        if !is_supported_video(&input.path) {
            return Err(invalid(format!(
                "{}: unsupported video format",
                input.path.display()
            )));
        }
        match tokio::fs::metadata(&input.path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(invalid(format!("{}: not a regular file", input.path.display())));
            }
            Err(e) => {
                warn!(path = %input.path.display(), error = %e, "Input not readable");
                return Err(invalid(format!("{}: {e}", input.path.display())));
            }
        }
        if !stems.insert(input.stem()) {
            return Err(invalid(format!(
                "duplicate input name '{}'; inputs must have distinct names",
                input.stem()
            )));
        }
    }
    Ok(())
}

fn invalid(message: String) -> OrchestratorError {
    SubmissionError::InvalidInput(message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use cliprun_core::input::assign_unique_names;
    use cliprun_core::{ProgressKind, Stage};
    use tempfile::TempDir;

    use crate::config::AnalysisPolicy;
    use crate::testing::{drain, FakeStages};

    struct Fixture {
        dir: TempDir,
        service: ClipService,
    }

    fn fixture(fake: &FakeStages, config: Config) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = config.with_output_dir(dir.path().join("output"));
        let service = ClipService::new(config, fake.collaborators());
        Fixture { dir, service }
    }

    fn video(dir: &Path, name: &str) -> VideoInput {
        let path = dir.join(name);
        std::fs::write(&path, b"video").unwrap();
        VideoInput::from_path(path)
    }

    impl Fixture {
        fn videos(&self, names: &[&str]) -> Vec<VideoInput> {
            names.iter().map(|n| video(self.dir.path(), n)).collect()
        }

        async fn submit(&self, names: &[&str]) -> TaskId {
            self.service
                .submit_task(self.videos(names), TaskOptions::default())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_inputs() {
        let f = fixture(&FakeStages::new(), Config::default());
        let err = f
            .service
            .submit_task(vec![], TaskOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Submission(SubmissionError::EmptyInputs)
        ));
        assert!(f.service.list_tasks(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_inputs() {
        let f = fixture(&FakeStages::new(), Config::default());

        let missing = VideoInput::from_path(f.dir.path().join("missing.mp4"));
        let text = video(f.dir.path(), "notes.txt");
        let partial = video(f.dir.path(), "clip.mp4.part");

        for input in [missing, text, partial] {
            let err = f
                .service
                .submit_task(vec![input], TaskOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                OrchestratorError::Submission(SubmissionError::InvalidInput(_))
            ));
        }
        assert!(f.service.list_tasks(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_colliding_names() {
        let f = fixture(&FakeStages::new(), Config::default());
        let inputs = f.videos(&["talk.mp4", "talk.mov"]);

        let err = f
            .service
            .submit_task(inputs, TaskOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate input name 'talk'"));
    }

    #[tokio::test]
    async fn test_same_basename_in_two_dirs_is_accepted() {
        let f = fixture(&FakeStages::new(), Config::default());
        let first = f.dir.path().join("one");
        let second = f.dir.path().join("two");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();
        video(&first, "talk.mp4");
        video(&second, "talk.mp4");

        let inputs = assign_unique_names([first.join("talk.mp4"), second.join("talk.mp4")]);
        let id = f
            .service
            .submit_task(inputs, TaskOptions::default())
            .await
            .unwrap();
        let task = f.service.wait_for_terminal(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_same_video_in_two_containers_is_accepted() {
        let f = fixture(&FakeStages::new(), Config::default());
        video(f.dir.path(), "talk.mp4");
        video(f.dir.path(), "talk.mov");

        let inputs = assign_unique_names([f.dir.path().join("talk.mp4"), f.dir.path().join("talk.mov")]);
        let id = f
            .service
            .submit_task(inputs, TaskOptions::default())
            .await
            .unwrap();
        let task = f.service.wait_for_terminal(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.inputs[1].stem(), "talk_2");
    }

    #[tokio::test]
    async fn test_completed_output_exists_in_workspace() {
        let f = fixture(&FakeStages::new(), Config::default());
        let id = f.submit(&["a.mp4", "b.mp4"]).await;

        let task = f.service.wait_for_terminal(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let result = task.result.unwrap();
        let workspace = task.workspace.unwrap();
        assert!(result.output.starts_with(&workspace));
        assert!(result.output.is_file());
        assert!(workspace.join("info.json").is_file());
    }

    #[tokio::test]
    async fn test_progress_stream_from_submission() {
        let fake = FakeStages::new().with_gate();
        let f = fixture(&fake, Config::default());
        let id = f.submit(&["a.mp4"]).await;

        let stream = f.service.subscribe_progress(&id).await.unwrap();
        fake.release(1);
        let events = drain(stream).await;

        let last = events.last().unwrap();
        assert!(matches!(
            last.kind,
            ProgressKind::Terminal {
                status: TaskStatus::Completed,
                ..
            }
        ));
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_terminal_event() {
        let f = fixture(&FakeStages::new(), Config::default());
        let id = f.submit(&["a.mp4"]).await;
        f.service.wait_for_terminal(&id).await.unwrap();

        let events = drain(f.service.subscribe_progress(&id).await.unwrap()).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_strict_analysis_failure_is_attributed() {
        let fake = FakeStages::new().fail_analysis();
        let config = Config::default().with_analysis_policy(AnalysisPolicy::Strict);
        let f = fixture(&fake, config);
        let id = f.submit(&["a.mp4"]).await;

        let task = f.service.wait_for_terminal(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.unwrap().stage, Some(Stage::Analyze));
        assert_eq!(fake.cut_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_task_through_service() {
        let fake = FakeStages::new().with_gate();
        let f = fixture(&fake, Config::default().with_max_concurrent_tasks(1));
        let running = f.submit(&["a.mp4"]).await;
        let queued = f.submit(&["b.mp4"]).await;

        assert_eq!(
            f.service.cancel_task(&queued).await.unwrap(),
            CancelAck::Cancelled
        );
        let task = f.service.get_status(&queued).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.started_at.is_none());

        fake.release(1);
        let task = f.service.wait_for_terminal(&running).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(
            f.service.cancel_task(&running).await.unwrap(),
            CancelAck::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_release_requires_terminal_task() {
        let fake = FakeStages::new().with_gate();
        let f = fixture(&fake, Config::default());
        let id = f.submit(&["a.mp4"]).await;

        let err = f.service.release(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StillActive(_)));

        fake.release(1);
        f.service.wait_for_terminal(&id).await.unwrap();
        let task = f.service.release(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(matches!(
            f.service.get_status(&id).await.unwrap_err(),
            OrchestratorError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_registry_capacity_exhausted() {
        let fake = FakeStages::new().with_gate();
        let mut config = Config::default();
        config.max_tracked_tasks = 2;
        let f = fixture(&fake, config);
        f.submit(&["a.mp4"]).await;
        f.submit(&["b.mp4"]).await;

        let err = f
            .service
            .submit_task(f.videos(&["c.mp4"]), TaskOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Submission(SubmissionError::ResourceExhausted(_))
        ));
        fake.release(2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let f = fixture(&FakeStages::new(), Config::default());
        let sweeper = f.service.spawn_retention_sweeper(Duration::from_millis(10));
        f.service.shutdown().await;

        let err = f
            .service
            .submit_task(f.videos(&["a.mp4"]), TaskOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Submission(SubmissionError::ShuttingDown)
        ));
        assert!(f.service.list_tasks(None).await.is_empty());
        tokio::time::timeout(Duration::from_secs(5), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_metrics_reflect_finished_tasks() {
        let f = fixture(&FakeStages::new(), Config::default());
        let id = f.submit(&["a.mp4"]).await;
        f.service.wait_for_terminal(&id).await.unwrap();

        let metrics = f.service.metrics().await;
        assert!(metrics.contains("cliprun_tasks_total{status=\"completed\"} 1"));
        assert!(metrics.contains("cliprun_queue_depth 0"));
    }
}
