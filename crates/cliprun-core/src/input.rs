//! Source video references and the names used for their artifacts.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Extensions accepted as pipeline input (lowercase, with the dot).
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mov", ".avi", ".mkv", ".wmv", ".flv", ".webm", ".m4v",
];

/// Maximum length of a sanitised file name, in bytes.
const MAX_NAME_LEN: usize = 255;

/// One input video of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInput {
    /// Sanitised, task-unique file name (e.g. `interview.mp4`, `interview_2.mp4`).
    pub name: String,

    /// Location of the source file.
    pub path: PathBuf,
}

impl VideoInput {
    /// Create an input whose name is the sanitised basename of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .unwrap_or_else(|| "unnamed".to_string());
        Self { name, path }
    }

    /// Create an input with an explicit display name.
    pub fn named(name: impl AsRef<str>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: sanitize_filename(name.as_ref()),
            path: path.into(),
        }
    }

    /// Name without its extension; used for artifact file names and as the
    /// video label inside merged transcripts and clip instructions.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }
}

/// Returns true if `path` has a supported video extension and is not a
/// partial download.
pub fn is_supported_video(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.ends_with(".part") {
        return false;
    }
    SUPPORTED_VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Build inputs for `paths`, giving inputs whose stem is already taken `_2`,
/// `_3`, ... suffixes so every input has a distinct artifact name.
///
/// Stems are compared rather than full names: `talk.mp4` and `talk.mov`
/// would otherwise share `talk_audio.mp3` and the `=== talk ===` label.
pub fn assign_unique_names<I, P>(paths: I) -> Vec<VideoInput>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut taken: HashSet<String> = HashSet::new();
    paths
        .into_iter()
        .map(|p| {
            let mut input = VideoInput::from_path(p);
            if !taken.insert(input.stem().to_string()) {
                let stem = input.stem().to_string();
                let ext = input.name[stem.len()..].to_string();
                let mut n = 2;
                while taken.contains(&format!("{stem}_{n}")) {
                    n += 1;
                }
                taken.insert(format!("{stem}_{n}"));
                input.name = format!("{stem}_{n}{ext}");
            }
            input
        })
        .collect()
}

/// Strip path traversal, control and shell-special characters from a file
/// name.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = name.replace("../", "_").replace("..\\", "_");
    let mut out: String = replaced
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    out = out.trim_start_matches('.').to_string();

    if out.len() > MAX_NAME_LEN {
        let ext = match out.rfind('.') {
            Some(idx) if out.len() - idx <= 16 => out[idx..].to_string(),
            _ => String::new(),
        };
        let mut cut = MAX_NAME_LEN - ext.len();
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out = format!("{}{}", &out[..cut], ext);
    }

    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}
