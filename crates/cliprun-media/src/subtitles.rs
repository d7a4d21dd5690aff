//! Subtitle burn-in: an SRT file rendered through ffmpeg's `subtitles` filter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use cliprun_core::transcript::to_srt;
use cliprun_core::{Sentence, StageError};
use cliprun_orchestrator::{StageContext, SubtitleRenderer};

use crate::ffmpeg::{subtitle_args, FfmpegTool};

#[derive(Debug, Clone)]
pub struct FfmpegSubtitleRenderer {
    tool: FfmpegTool,
}

impl FfmpegSubtitleRenderer {
    pub fn new(tool: FfmpegTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl SubtitleRenderer for FfmpegSubtitleRenderer {
    async fn render(
        &self,
        ctx: &StageContext,
        video: &Path,
        sentences: &[Sentence],
        output: &Path,
    ) -> Result<PathBuf, StageError> {
        if sentences.is_empty() {
            return Err(StageError::RenderFailed(
                "no sentences fall inside the cut clips".to_string(),
            ));
        }

        let srt = ctx.workspace.subtitles_path();
        tokio::fs::write(&srt, to_srt(sentences))
            .await
            .map_err(|e| StageError::RenderFailed(e.to_string()))?;

        // ffmpeg runs inside the workspace; the filter graph takes the bare name.
        let (dir, name) = match (srt.parent(), srt.file_name().and_then(|n| n.to_str())) {
            (Some(dir), Some(name)) => (dir, name),
            _ => {
                return Err(StageError::RenderFailed(format!(
                    "invalid subtitle path {}",
                    srt.display()
                )))
            }
        };

        self.tool
            .run_in(dir, &subtitle_args(video, name, output), &ctx.cancel)
            .await
            .map_err(|e| e.into_stage(StageError::RenderFailed))?;

        info!(
            task_id = %ctx.task_id,
            sentences = sentences.len(),
            output = %output.display(),
            "Subtitles rendered"
        );
        Ok(output.to_path_buf())
    }
}
