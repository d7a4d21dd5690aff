//! Pipeline Runner: sequences the stages for one admitted task.
//!
//! The runner re-checks the cancellation token before every stage and stops
//! advancing once it fires. The whole pipeline future is raced against the
//! task deadline; when the deadline wins the future is dropped and the task
//! ends `TimedOut`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use cliprun_core::clip::{default_selection, merge_adjacent, to_clip_order};
use cliprun_core::{
    ClipInstruction, MergedTranscript, ProgressEvent, SkippedInput, Stage, StageError, Task, TaskError, TaskId,
    TaskResult, TaskStatus, Transcript, VideoInput,
};

use crate::config::{AnalysisPolicy, Config};
use crate::progress::ProgressHub;
use crate::registry::{TaskRegistry, Transition};
use crate::stages::{Collaborators, StageContext};
use crate::workspace::Workspace;

/// Why the pipeline stopped before producing a result.
enum Halt {
    Cancelled,
    Failed(TaskError),
}

impl Halt {
    fn from_stage(stage: Stage, err: StageError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Failed(TaskError::at(stage, err.to_string()))
        }
    }
}

/// Apply a terminal transition, publish the terminal event and close the
/// task's progress channel.
///
/// Returns the status the task ended in. If another component already moved
/// the task to a terminal state, that status is returned unchanged and
/// nothing is published.
pub(crate) async fn commit_terminal(
    registry: &TaskRegistry,
    progress: &ProgressHub,
    task_id: &TaskId,
    transition: Transition,
) -> Option<TaskStatus> {
    match registry.transition(task_id, transition).await {
        Ok(task) => {
            progress
                .publish(ProgressEvent::terminal(
                    task.id.clone(),
                    task.status,
                    task.result.clone(),
                    task.error.clone(),
                ))
                .await;
            Some(task.status)
        }
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Terminal transition not applied");
            registry.get(task_id).await.ok().map(|t| t.status)
        }
    }
}

/// Runs the pipeline for one task at a time; cheap to clone.
#[derive(Clone)]
pub struct PipelineRunner {
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressHub>,
    collaborators: Arc<Collaborators>,
    config: Arc<Config>,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        progress: Arc<ProgressHub>,
        collaborators: Arc<Collaborators>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            progress,
            collaborators,
            config,
        }
    }

    /// Run an admitted (`Running`) task to a terminal state.
    pub async fn run(
        &self,
        task_id: TaskId,
        workspace: Workspace,
        cancel: CancellationToken,
    ) -> Option<TaskStatus> {
        let span = info_span!("runner", task_id = %task_id);
        async move {
            let ctx = StageContext {
                task_id: task_id.clone(),
                workspace,
                cancel,
            };
            let timeout = self.config.task_timeout;

            let pipeline = AssertUnwindSafe(self.execute(&ctx)).catch_unwind();
            let transition = tokio::select! {
                outcome = pipeline => match outcome {
                    Ok(Ok(result)) => Transition::Complete(result),
                    Ok(Err(Halt::Cancelled)) => Transition::Cancel,
                    Ok(Err(Halt::Failed(error))) => Transition::Fail(error),
                    Err(_) => {
                        error!("Pipeline panicked");
                        Transition::Fail(TaskError::new(
                            self.current_stage(&task_id).await,
                            "pipeline runner panicked",
                        ))
                    }
                },
                _ = tokio::time::sleep(timeout) => {
                    let stage = self.current_stage(&task_id).await;
                    warn!(timeout_secs = timeout.as_secs(), stage = ?stage, "Task deadline elapsed");
                    ctx.cancel.cancel();
                    Transition::TimeOut(TaskError::new(
                        stage,
                        format!("task exceeded its deadline of {}s", timeout.as_secs()),
                    ))
                }
            };

            let status = commit_terminal(&self.registry, &self.progress, &task_id, transition).await;
            info!(status = ?status, "Runner finished");
            status
        }
        .instrument(span)
        .await
    }

    async fn current_stage(&self, task_id: &TaskId) -> Option<Stage> {
        self.registry.get(task_id).await.ok().and_then(|t| t.current_stage)
    }

    async fn execute(&self, ctx: &StageContext) -> Result<TaskResult, Halt> {
        let task = self
            .registry
            .get(&ctx.task_id)
            .await
            .map_err(|e| Halt::Failed(TaskError::new(None, e.to_string())))?;

        self.progress
            .publish(ProgressEvent::started(
                ctx.task_id.clone(),
                ctx.workspace.root().to_path_buf(),
            ))
            .await;

        let transcripts = self.transcribe_inputs(ctx, &task).await?;
        let merged = self.merge_transcripts(ctx, transcripts).await?;
        let (clips, used_default_selection) = self.analyze(ctx, &task, &merged).await?;

        self.begin(ctx, Stage::Cut, None).await?;
        let cut = self
            .collaborators
            .cutter
            .cut(ctx, &clips, &task.inputs)
            .await
            .map_err(|e| Halt::from_stage(Stage::Cut, e))?;
        for (clip, reason) in &cut.skipped {
            warn!(video = %clip.video, start = clip.start, end = clip.end, reason = %reason, "Clip skipped");
        }
        if cut.clips.is_empty() {
            return Err(Halt::Failed(TaskError::at(
                Stage::Cut,
                "no clip could be cut from the selected instructions",
            )));
        }
        self.complete(ctx, Stage::Cut, None).await;

        self.begin(ctx, Stage::MergeVideo, None).await?;
        let clip_paths: Vec<_> = cut.clips.iter().map(|c| c.path.clone()).collect();
        let mut output = self
            .collaborators
            .video_merger
            .merge(ctx, &clip_paths, &ctx.workspace.merged_video_path())
            .await
            .map_err(|e| Halt::from_stage(Stage::MergeVideo, e))?;
        self.complete(ctx, Stage::MergeVideo, None).await;

        let mut subtitles_skipped = false;
        if task.options.captions {
            self.begin(ctx, Stage::AddSubtitles, None).await?;
            let instructions: Vec<_> = cut.clips.iter().map(|c| c.instruction.clone()).collect();
            let sentences = merged.align_to_clips(&instructions);
            match self
                .collaborators
                .subtitles
                .render(ctx, &output, &sentences, &ctx.workspace.subtitled_video_path())
                .await
            {
                Ok(path) => {
                    output = path;
                    self.complete(ctx, Stage::AddSubtitles, None).await;
                }
                Err(e) if e.is_cancelled() => return Err(Halt::Cancelled),
                Err(e) if self.config.subtitle_fallback => {
                    warn!(error = %e, "Subtitle rendering failed, keeping plain video");
                    subtitles_skipped = true;
                    self.progress
                        .publish(ProgressEvent::subtitles_skipped(ctx.task_id.clone(), &e.to_string()))
                        .await;
                }
                Err(e) => return Err(Halt::from_stage(Stage::AddSubtitles, e)),
            }
        }

        // The result is only committed if nobody asked us to stop.
        checkpoint(ctx)?;

        let final_stage = if task.options.captions && !subtitles_skipped {
            Stage::AddSubtitles
        } else {
            Stage::MergeVideo
        };
        if !ctx.workspace.contains(&output) || tokio::fs::metadata(&output).await.is_err() {
            return Err(Halt::Failed(TaskError::at(
                final_stage,
                format!("output {} is missing from the workspace", output.display()),
            )));
        }

        Ok(TaskResult {
            output,
            clip_count: cut.clips.len(),
            used_default_selection,
            subtitles_skipped,
        })
    }

    /// Run the per-video stages for every input, collecting what succeeded.
    async fn transcribe_inputs(&self, ctx: &StageContext, task: &Task) -> Result<Vec<Transcript>, Halt> {
        let mut transcripts = Vec::with_capacity(task.inputs.len());
        let mut last_failure: Option<TaskError> = None;

        for input in &task.inputs {
            match self.process_video(ctx, input).await {
                Ok(transcript) => transcripts.push(transcript),
                Err((_, e)) if e.is_cancelled() => return Err(Halt::Cancelled),
                Err((stage, e)) => {
                    let reason = e.to_string();
                    self.skip_input(ctx, input, stage, &reason).await;
                    last_failure = Some(TaskError::at(stage, reason));
                }
            }
        }

        if transcripts.is_empty() {
            let error = match last_failure {
                Some(last) => TaskError::new(
                    last.stage,
                    format!("no input produced a usable transcript; last error: {}", last.message),
                ),
                None => TaskError::at(Stage::Transcribe, "no input produced a usable transcript"),
            };
            return Err(Halt::Failed(error));
        }

        info!(
            usable = transcripts.len(),
            skipped = task.inputs.len() - transcripts.len(),
            "Per-video stages finished"
        );
        Ok(transcripts)
    }

    async fn skip_input(&self, ctx: &StageContext, input: &VideoInput, stage: Stage, reason: &str) {
        warn!(input = %input.name, stage = %stage, error = %reason, "Input skipped");
        if let Err(e) = self
            .registry
            .record_skipped(&ctx.task_id, SkippedInput::new(&input.name, stage, reason))
            .await
        {
            warn!(input = %input.name, error = %e, "Could not record skipped input");
        }
        self.progress
            .publish(ProgressEvent::input_skipped(ctx.task_id.clone(), &input.name, stage, reason))
            .await;
    }

    /// Extract, upload and transcribe one input.
    ///
    /// Cancellation observed at a stage boundary is reported as
    /// `StageError::Cancelled` against the stage that would have started.
    /// The extracted audio is removed whether or not transcription succeeds.
    async fn process_video(
        &self,
        ctx: &StageContext,
        input: &VideoInput,
    ) -> Result<Transcript, (Stage, StageError)> {
        let name = Some(input.name.as_str());
        let c = &self.collaborators;

        self.begin_video(ctx, Stage::Extract, name).await?;
        let audio = c
            .extractor
            .extract(ctx, input)
            .await
            .map_err(|e| (Stage::Extract, e))?;
        self.complete(ctx, Stage::Extract, name).await;

        let transcribed = async {
            self.begin_video(ctx, Stage::Upload, name).await?;
            let object = c
                .uploader
                .upload(ctx, &audio)
                .await
                .map_err(|e| (Stage::Upload, e))?;
            self.complete(ctx, Stage::Upload, name).await;

            self.begin_video(ctx, Stage::Transcribe, name).await?;
            c.transcriber
                .transcribe(ctx, input, &object)
                .await
                .map_err(|e| (Stage::Transcribe, e))
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&audio).await {
            debug!(path = %audio.display(), error = %e, "Could not remove extracted audio");
        }
        let mut transcript = transcribed?;
        transcript.source = input.stem().to_string();

        if transcript.is_empty() {
            return Err((
                Stage::Transcribe,
                StageError::TranscriptionFailed("no speech recognised".to_string()),
            ));
        }

        let json = serde_json::to_vec_pretty(&transcript.sentences)
            .map_err(|e| (Stage::Transcribe, StageError::TranscriptionFailed(e.to_string())))?;
        tokio::fs::write(ctx.workspace.transcript_path(input.stem()), json)
            .await
            .map_err(|e| (Stage::Transcribe, StageError::TranscriptionFailed(e.to_string())))?;
        self.complete(ctx, Stage::Transcribe, name).await;

        Ok(transcript)
    }

    async fn merge_transcripts(
        &self,
        ctx: &StageContext,
        transcripts: Vec<Transcript>,
    ) -> Result<MergedTranscript, Halt> {
        self.begin(ctx, Stage::MergeTranscripts, None).await?;
        let merged = self
            .collaborators
            .transcript_merger
            .merge(ctx, transcripts)
            .await
            .map_err(|e| Halt::from_stage(Stage::MergeTranscripts, e))?;
        write_artifact(&ctx.workspace.merged_transcript_path(), &merged.text)
            .await
            .map_err(|e| Halt::Failed(TaskError::at(Stage::MergeTranscripts, e.to_string())))?;
        self.complete(ctx, Stage::MergeTranscripts, None).await;
        Ok(merged)
    }

    /// Run analysis, applying the configured policy on failure, and write
    /// `important_dialogues.txt` and `clip_order.txt`.
    async fn analyze(
        &self,
        ctx: &StageContext,
        task: &Task,
        merged: &MergedTranscript,
    ) -> Result<(Vec<ClipInstruction>, bool), Halt> {
        self.begin(ctx, Stage::Analyze, None).await?;

        let analysis = self
            .collaborators
            .analyzer
            .analyze(ctx, merged, task.options.prompt.as_deref())
            .await
            .and_then(|a| {
                if a.clips.is_empty() {
                    Err(StageError::AnalysisFailed(
                        "analysis returned no usable clip instructions".to_string(),
                    ))
                } else {
                    Ok(a)
                }
            });

        let (dialogues, clips, degraded) = match analysis {
            Ok(a) => (a.important_dialogues, a.clips, false),
            Err(e) if e.is_cancelled() => return Err(Halt::Cancelled),
            Err(e) => match self.config.analysis_policy {
                AnalysisPolicy::Strict => return Err(Halt::from_stage(Stage::Analyze, e)),
                AnalysisPolicy::DegradeToDefault => {
                    let clips = default_selection(merged);
                    if clips.is_empty() {
                        return Err(Halt::Failed(TaskError::at(
                            Stage::Analyze,
                            format!("{e}; default selection found nothing to keep"),
                        )));
                    }
                    warn!(error = %e, clips = clips.len(), "Analysis failed, using default selection");
                    self.progress
                        .publish(ProgressEvent::analysis_degraded(ctx.task_id.clone(), &e.to_string()))
                        .await;
                    let note = format!("Default selection used because analysis failed: {e}\n");
                    (note, clips, true)
                }
            },
        };

        let clips = merge_adjacent(
            &clips,
            self.config.clip_adjacent_gap,
            self.config.clip_end_padding,
        );
        let written = async {
            write_artifact(&ctx.workspace.dialogues_path(), &dialogues).await?;
            write_artifact(&ctx.workspace.clip_order_path(), &to_clip_order(&clips)).await
        };
        written
            .await
            .map_err(|e| Halt::Failed(TaskError::at(Stage::Analyze, e.to_string())))?;

        self.complete(ctx, Stage::Analyze, None).await;
        Ok((clips, degraded))
    }

    /// Stage boundary: stop if cancelled, otherwise record and announce the
    /// stage.
    async fn begin(&self, ctx: &StageContext, stage: Stage, input: Option<&str>) -> Result<(), Halt> {
        checkpoint(ctx)?;
        if let Err(e) = self.registry.record_stage(&ctx.task_id, stage).await {
            warn!(stage = %stage, error = %e, "Could not record stage");
        }
        info!(stage = %stage, input = input.unwrap_or("-"), "Stage started");
        self.progress
            .publish(ProgressEvent::stage_started(ctx.task_id.clone(), stage, input))
            .await;
        Ok(())
    }

    async fn begin_video(
        &self,
        ctx: &StageContext,
        stage: Stage,
        input: Option<&str>,
    ) -> Result<(), (Stage, StageError)> {
        self.begin(ctx, stage, input)
            .await
            .map_err(|_| (stage, StageError::Cancelled))
    }

    async fn complete(&self, ctx: &StageContext, stage: Stage, input: Option<&str>) {
        info!(stage = %stage, input = input.unwrap_or("-"), "Stage completed");
        self.progress
            .publish(ProgressEvent::stage_completed(ctx.task_id.clone(), stage, input))
            .await;
    }
}

fn checkpoint(ctx: &StageContext) -> Result<(), Halt> {
    if ctx.cancel.is_cancelled() {
        info!("Cancellation observed at stage boundary");
        return Err(Halt::Cancelled);
    }
    Ok(())
}

async fn write_artifact(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await
}
