//! Per-task working directory and the names of the artifacts inside it.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use cliprun_core::{TaskId, TaskOptions, VideoInput};

const TEMP_DIR: &str = "temp";
const CUTS_DIR: &str = "cuts";

/// Exclusive directory owned by one task.
///
/// Layout:
///
/// ```text
/// <root>/
///   temp/<name>_audio.mp3
///   temp/<name>_transcript.json
///   cuts/clip_<n>.mp4
///   info.json
///   merged_transcripts.txt
///   important_dialogues.txt
///   clip_order.txt
///   merged_highlights.mp4
///   merged_highlights.srt
///   merged_highlights_with_subtitles.mp4
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

#[derive(Serialize)]
struct InfoFile<'a> {
    task_id: &'a str,
    text: &'a str,
    caption_enable: bool,
    inputs: Vec<&'a str>,
}

impl Workspace {
    /// Create the task directory under `base`.
    ///
    /// Fails if the directory already exists, so no two tasks can ever share
    /// one.
    pub async fn create(base: &Path, task_id: &TaskId) -> io::Result<Self> {
        tokio::fs::create_dir_all(base).await?;
        let root = base.join(task_id.as_str());
        tokio::fs::create_dir(&root).await?;

        let workspace = Self { root };
        tokio::fs::create_dir(workspace.temp_dir()).await?;
        tokio::fs::create_dir(workspace.cuts_dir()).await?;
        debug!(task_id = %task_id, root = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    /// Refer to an existing task directory.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn cuts_dir(&self) -> PathBuf {
        self.root.join(CUTS_DIR)
    }

    pub fn audio_path(&self, stem: &str) -> PathBuf {
        self.temp_dir().join(format!("{stem}_audio.mp3"))
    }

    pub fn transcript_path(&self, stem: &str) -> PathBuf {
        self.temp_dir().join(format!("{stem}_transcript.json"))
    }

    /// Path of the `index`-th cut clip (1-based).
    pub fn clip_path(&self, index: usize) -> PathBuf {
        self.cuts_dir().join(format!("clip_{index}.mp4"))
    }

    pub fn info_path(&self) -> PathBuf {
        self.root.join("info.json")
    }

    pub fn merged_transcript_path(&self) -> PathBuf {
        self.root.join("merged_transcripts.txt")
    }

    pub fn dialogues_path(&self) -> PathBuf {
        self.root.join("important_dialogues.txt")
    }

    pub fn clip_order_path(&self) -> PathBuf {
        self.root.join("clip_order.txt")
    }

    pub fn merged_video_path(&self) -> PathBuf {
        self.root.join("merged_highlights.mp4")
    }

    pub fn subtitles_path(&self) -> PathBuf {
        self.root.join("merged_highlights.srt")
    }

    pub fn subtitled_video_path(&self) -> PathBuf {
        self.root.join("merged_highlights_with_subtitles.mp4")
    }

    /// Returns true if `path` lies inside this workspace.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Write `info.json` describing the submission.
    pub async fn write_info(
        &self,
        task_id: &TaskId,
        inputs: &[VideoInput],
        options: &TaskOptions,
    ) -> io::Result<()> {
        let info = InfoFile {
            task_id: task_id.as_str(),
            text: options.prompt.as_deref().unwrap_or_default(),
            caption_enable: options.captions,
            inputs: inputs.iter().map(|i| i.name.as_str()).collect(),
        };
        let json = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;
        tokio::fs::write(self.info_path(), json).await
    }

    /// Remove `temp/` and `cuts/`, keeping the named artifacts.
    pub async fn purge_intermediates(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.temp_dir()).await?;
        remove_dir_if_exists(&self.cuts_dir()).await
    }

    /// Remove the whole task directory.
    pub async fn purge(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.root).await
    }
}

async fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
