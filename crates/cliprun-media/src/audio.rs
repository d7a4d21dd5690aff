//! Audio extraction with ffmpeg.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use cliprun_core::{StageError, VideoInput};
use cliprun_orchestrator::{AudioExtractor, StageContext};

use crate::ffmpeg::{extract_audio_args, FfmpegTool};

/// Writes `temp/<name>_audio.mp3` for each input.
#[derive(Debug, Clone)]
pub struct FfmpegAudioExtractor {
    tool: FfmpegTool,
}

impl FfmpegAudioExtractor {
    pub fn new(tool: FfmpegTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl AudioExtractor for FfmpegAudioExtractor {
    async fn extract(&self, ctx: &StageContext, input: &VideoInput) -> Result<PathBuf, StageError> {
        let output = ctx.workspace.audio_path(input.stem());
        let args = extract_audio_args(&input.path, &output);
        self.tool
            .run(&args, &ctx.cancel)
            .await
            .map_err(|e| e.into_stage(StageError::ExtractionFailed))?;

        let size = tokio::fs::metadata(&output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(StageError::ExtractionFailed(format!(
                "{}: ffmpeg produced no audio",
                input.name
            )));
        }

        info!(
            task_id = %ctx.task_id,
            input = %input.name,
            bytes = size,
            "Audio extracted"
        );
        Ok(output)
    }
}
