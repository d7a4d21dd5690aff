//! Collaborator interfaces for the pipeline stages.
//!
//! Every stage is a black box to the runner: a call either returns usable
//! output or a terminal [`StageError`]. Retrying transient failures is the
//! collaborator's own business. Collaborators that can stop early should watch
//! [`StageContext::cancel`] and return [`StageError::Cancelled`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cliprun_core::{ClipInstruction, MergedTranscript, Sentence, StageError, TaskId, Transcript, VideoInput};

use crate::workspace::Workspace;

/// What every stage call gets to know about the task it works for.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub task_id: TaskId,
    /// The only directory the stage may write to.
    pub workspace: Workspace,
    pub cancel: CancellationToken,
}

/// Object produced by the uploader and consumed by the transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// URI the transcription provider can fetch.
    pub uri: String,
    /// Local copy of the uploaded file.
    pub local_path: PathBuf,
}

/// Output of the analysis stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Free text written to `important_dialogues.txt`.
    pub important_dialogues: String,
    /// Clip-cut instructions in playback order.
    pub clips: Vec<ClipInstruction>,
}

/// One clip file written by the cutter.
#[derive(Debug, Clone, PartialEq)]
pub struct CutClip {
    pub instruction: ClipInstruction,
    pub path: PathBuf,
}

/// Result of the cut stage. Some instructions may have been skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CutOutput {
    /// Cut clips in playback order.
    pub clips: Vec<CutClip>,
    /// Instructions that could not be cut, with the reason.
    pub skipped: Vec<(ClipInstruction, String)>,
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Extract the audio track of `input` into the workspace.
    async fn extract(&self, ctx: &StageContext, input: &VideoInput) -> Result<PathBuf, StageError>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, ctx: &StageContext, audio: &Path) -> Result<RemoteObject, StageError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the uploaded audio of `input`.
    async fn transcribe(
        &self,
        ctx: &StageContext,
        input: &VideoInput,
        object: &RemoteObject,
    ) -> Result<Transcript, StageError>;
}

#[async_trait]
pub trait TranscriptMerger: Send + Sync {
    async fn merge(
        &self,
        ctx: &StageContext,
        transcripts: Vec<Transcript>,
    ) -> Result<MergedTranscript, StageError>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Pick the clips worth keeping. `prompt` is the caller's optional hint.
    async fn analyze(
        &self,
        ctx: &StageContext,
        merged: &MergedTranscript,
        prompt: Option<&str>,
    ) -> Result<Analysis, StageError>;
}

#[async_trait]
pub trait ClipCutter: Send + Sync {
    /// Cut `clips` out of `sources`. Instructions are matched to sources by
    /// [`VideoInput::stem`].
    async fn cut(
        &self,
        ctx: &StageContext,
        clips: &[ClipInstruction],
        sources: &[VideoInput],
    ) -> Result<CutOutput, StageError>;
}

#[async_trait]
pub trait VideoMerger: Send + Sync {
    /// Concatenate `clips` in order into `output`.
    async fn merge(
        &self,
        ctx: &StageContext,
        clips: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, StageError>;
}

#[async_trait]
pub trait SubtitleRenderer: Send + Sync {
    /// Burn `sentences` (already on `video`'s timeline) into `output`.
    async fn render(
        &self,
        ctx: &StageContext,
        video: &Path,
        sentences: &[Sentence],
        output: &Path,
    ) -> Result<PathBuf, StageError>;
}

/// Merges transcripts into the `=== name ===` text document.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextTranscriptMerger;

#[async_trait]
impl TranscriptMerger for TextTranscriptMerger {
    async fn merge(
        &self,
        _ctx: &StageContext,
        transcripts: Vec<Transcript>,
    ) -> Result<MergedTranscript, StageError> {
        MergedTranscript::merge(transcripts)
    }
}

/// The full set of collaborators one pipeline run uses.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn AudioExtractor>,
    pub uploader: Arc<dyn Uploader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub transcript_merger: Arc<dyn TranscriptMerger>,
    pub analyzer: Arc<dyn Analyzer>,
    pub cutter: Arc<dyn ClipCutter>,
    pub video_merger: Arc<dyn VideoMerger>,
    pub subtitles: Arc<dyn SubtitleRenderer>,
}
