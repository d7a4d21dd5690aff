//! Scripted in-memory collaborators for orchestrator tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_stream::StreamExt;

use cliprun_core::{
    ClipInstruction, MergedTranscript, ProgressEvent, Sentence, StageError, Transcript, VideoInput,
};

use crate::progress::ProgressStream;
use crate::stages::{
    Analysis, Analyzer, AudioExtractor, ClipCutter, Collaborators, CutClip, CutOutput, RemoteObject,
    StageContext, SubtitleRenderer, Transcriber, TranscriptMerger, Uploader, VideoMerger,
};

#[derive(Default)]
struct Recorder {
    analyze_calls: AtomicUsize,
    cut_calls: AtomicUsize,
    merged_sources: Mutex<Vec<Vec<String>>>,
    cut_videos: Mutex<Vec<String>>,
}

/// One fake implementing every stage. Builder methods script failures.
#[derive(Clone, Default)]
pub struct FakeStages {
    fail_extraction: HashSet<String>,
    fail_transcription: HashSet<String>,
    fail_analysis: bool,
    panic_in_analysis: bool,
    fail_subtitles: bool,
    skip_merge_output: bool,
    stage_delay: Option<Duration>,
    stuck_stage: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    recorder: Arc<Recorder>,
}

impl FakeStages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extraction fails for the input with this stem.
    pub fn fail_extraction(mut self, stem: &str) -> Self {
        self.fail_extraction.insert(stem.to_string());
        self
    }

    /// Transcription fails for the input with this stem.
    pub fn fail_transcription(mut self, stem: &str) -> Self {
        self.fail_transcription.insert(stem.to_string());
        self
    }

    pub fn fail_analysis(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    pub fn panic_in_analysis(mut self) -> Self {
        self.panic_in_analysis = true;
        self
    }

    pub fn fail_subtitles(mut self) -> Self {
        self.fail_subtitles = true;
        self
    }

    /// The video merger reports success without writing its output.
    pub fn skip_merge_output(mut self) -> Self {
        self.skip_merge_output = true;
        self
    }

    /// Every extraction sleeps this long (cancellable).
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = Some(delay);
        self
    }

    /// Every extraction sleeps this long and ignores cancellation.
    pub fn with_stuck_stage(mut self, delay: Duration) -> Self {
        self.stuck_stage = Some(delay);
        self
    }

    /// Every extraction waits for a permit released with [`FakeStages::release`].
    pub fn with_gate(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `n` gated extractions proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        let fake = Arc::new(self.clone());
        Collaborators {
            extractor: fake.clone(),
            uploader: fake.clone(),
            transcriber: fake.clone(),
            transcript_merger: fake.clone(),
            analyzer: fake.clone(),
            cutter: fake.clone(),
            video_merger: fake.clone(),
            subtitles: fake,
        }
    }

    pub fn analyze_calls(&self) -> usize {
        self.recorder.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn cut_calls(&self) -> usize {
        self.recorder.cut_calls.load(Ordering::SeqCst)
    }

    /// Sources of every transcript merge, one entry per merge call.
    pub fn merged_sources(&self) -> Vec<Vec<String>> {
        self.recorder.merged_sources.lock().unwrap().clone()
    }

    /// Videos referenced by every instruction handed to the cutter.
    pub fn cut_videos(&self) -> Vec<String> {
        self.recorder.cut_videos.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioExtractor for FakeStages {
    async fn extract(&self, ctx: &StageContext, input: &VideoInput) -> Result<PathBuf, StageError> {
        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
            }
        }
        if let Some(delay) = self.stage_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
            }
        }
        if let Some(delay) = self.stuck_stage {
            tokio::time::sleep(delay).await;
        }
        if self.fail_extraction.contains(input.stem()) {
            return Err(StageError::ExtractionFailed("no audio stream".to_string()));
        }
        let path = ctx.workspace.audio_path(input.stem());
        tokio::fs::write(&path, b"audio")
            .await
            .map_err(|e| StageError::ExtractionFailed(e.to_string()))?;
        Ok(path)
    }
}

#[async_trait]
impl Uploader for FakeStages {
    async fn upload(&self, _ctx: &StageContext, audio: &Path) -> Result<RemoteObject, StageError> {
        Ok(RemoteObject {
            uri: format!("mem://{}", audio.display()),
            local_path: audio.to_path_buf(),
        })
    }
}

#[async_trait]
impl Transcriber for FakeStages {
    async fn transcribe(
        &self,
        _ctx: &StageContext,
        input: &VideoInput,
        _object: &RemoteObject,
    ) -> Result<Transcript, StageError> {
        let stem = input.stem();
        if self.fail_transcription.contains(stem) {
            return Err(StageError::TranscriptionFailed("provider error".to_string()));
        }
        Ok(Transcript::new(
            stem,
            vec![
                Sentence::new(1.0, 3.0, format!("hello from {stem}")),
                Sentence::new(5.0, 8.0, "the good part"),
            ],
        ))
    }
}

#[async_trait]
impl TranscriptMerger for FakeStages {
    async fn merge(
        &self,
        _ctx: &StageContext,
        transcripts: Vec<Transcript>,
    ) -> Result<MergedTranscript, StageError> {
        self.recorder
            .merged_sources
            .lock()
            .unwrap()
            .push(transcripts.iter().map(|t| t.source.clone()).collect());
        MergedTranscript::merge(transcripts)
    }
}

#[async_trait]
impl Analyzer for FakeStages {
    async fn analyze(
        &self,
        _ctx: &StageContext,
        merged: &MergedTranscript,
        _prompt: Option<&str>,
    ) -> Result<Analysis, StageError> {
        self.recorder.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_in_analysis {
            panic!("analyzer exploded");
        }
        if self.fail_analysis {
            return Err(StageError::AnalysisFailed("HTTP 503".to_string()));
        }
        let clips = merged
            .transcripts
            .iter()
            .filter_map(|t| {
                let s = t.sentences.last()?;
                Some(ClipInstruction::new(t.source.clone(), s.start, s.end))
            })
            .collect();
        Ok(Analysis {
            important_dialogues: "the good part\n".to_string(),
            clips,
        })
    }
}

#[async_trait]
impl ClipCutter for FakeStages {
    async fn cut(
        &self,
        ctx: &StageContext,
        clips: &[ClipInstruction],
        _sources: &[VideoInput],
    ) -> Result<CutOutput, StageError> {
        self.recorder.cut_calls.fetch_add(1, Ordering::SeqCst);
        self.recorder
            .cut_videos
            .lock()
            .unwrap()
            .extend(clips.iter().map(|c| c.video.clone()));

        let mut output = CutOutput::default();
        for (i, clip) in clips.iter().enumerate() {
            let path = ctx.workspace.clip_path(i + 1);
            tokio::fs::write(&path, b"clip")
                .await
                .map_err(|e| StageError::CutFailed(e.to_string()))?;
            output.clips.push(CutClip {
                instruction: clip.clone(),
                path,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl VideoMerger for FakeStages {
    async fn merge(
        &self,
        _ctx: &StageContext,
        _clips: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, StageError> {
        if !self.skip_merge_output {
            tokio::fs::write(output, b"video")
                .await
                .map_err(|e| StageError::MergeFailed(e.to_string()))?;
        }
        Ok(output.to_path_buf())
    }
}

#[async_trait]
impl SubtitleRenderer for FakeStages {
    async fn render(
        &self,
        _ctx: &StageContext,
        _video: &Path,
        _sentences: &[Sentence],
        output: &Path,
    ) -> Result<PathBuf, StageError> {
        if self.fail_subtitles {
            return Err(StageError::RenderFailed("font not found".to_string()));
        }
        tokio::fs::write(output, b"subtitled")
            .await
            .map_err(|e| StageError::RenderFailed(e.to_string()))?;
        Ok(output.to_path_buf())
    }
}

/// Collect a progress stream until it closes.
pub async fn drain(stream: ProgressStream) -> Vec<ProgressEvent> {
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("progress stream did not close")
}
