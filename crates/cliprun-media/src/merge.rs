//! Concatenation of cut clips with the ffmpeg concat demuxer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use cliprun_core::StageError;
use cliprun_orchestrator::{StageContext, VideoMerger};

use crate::ffmpeg::{concat_args, concat_list, FfmpegTool};

const CONCAT_LIST_FILE: &str = "concat_list.txt";

#[derive(Debug, Clone)]
pub struct FfmpegVideoMerger {
    tool: FfmpegTool,
}

impl FfmpegVideoMerger {
    pub fn new(tool: FfmpegTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl VideoMerger for FfmpegVideoMerger {
    async fn merge(
        &self,
        ctx: &StageContext,
        clips: &[PathBuf],
        output: &Path,
    ) -> Result<PathBuf, StageError> {
        if clips.is_empty() {
            return Err(StageError::MergeFailed("no clips to merge".to_string()));
        }

        let list = ctx.workspace.temp_dir().join(CONCAT_LIST_FILE);
        tokio::fs::write(&list, concat_list(clips))
            .await
            .map_err(|e| StageError::MergeFailed(e.to_string()))?;

        self.tool
            .run(&concat_args(&list, output), &ctx.cancel)
            .await
            .map_err(|e| e.into_stage(StageError::MergeFailed))?;

        info!(
            task_id = %ctx.task_id,
            clips = clips.len(),
            output = %output.display(),
            "Clips merged"
        );
        Ok(output.to_path_buf())
    }
}
