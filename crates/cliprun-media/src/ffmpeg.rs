//! ffmpeg / ffprobe subprocess execution.
//!
//! Every invocation is a one-shot child process with piped stdout/stderr.
//! Children are killed when the task's cancellation token fires or when the
//! future running them is dropped (deadline), so no encoder outlives its
//! task.

use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::MediaError;

/// Lines of stderr kept for the error message of a failed run.
const STDERR_TAIL_LINES: usize = 20;

/// Paths of the ffmpeg tools.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegTool {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Run ffmpeg with `args` until it exits or `cancel` fires.
    pub async fn run(&self, args: &[String], cancel: &CancellationToken) -> Result<(), MediaError> {
        run_program(&self.ffmpeg_path, args, None, cancel).await?;
        Ok(())
    }

    /// Run ffmpeg with `dir` as its working directory.
    pub async fn run_in(
        &self,
        dir: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), MediaError> {
        run_program(&self.ffmpeg_path, args, Some(dir), cancel).await?;
        Ok(())
    }

    /// Container duration of `path` in seconds.
    pub async fn probe_duration(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<f64, MediaError> {
        let args = probe_duration_args(path);
        let stdout = run_program(&self.ffprobe_path, &args, None, cancel).await?;
        stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| {
                MediaError::InvalidResponse(format!(
                    "ffprobe returned no duration for {}",
                    path.display()
                ))
            })
    }
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

/// Spawn `program`, wait for it, and return its stdout.
pub(crate) async fn run_program(
    program: &str,
    args: &[String],
    dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<String, MediaError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    debug!(program = %program, ?args, "Spawning process");
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            MediaError::NotFound(program.to_string())
        } else {
            error!(program = %program, error = %e, "Failed to spawn process");
            MediaError::SpawnError(e)
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::InvalidResponse("Failed to get stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| MediaError::InvalidResponse("Failed to get stderr".to_string()))?;

    // Spawn stderr reader for logging
    let stderr_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let mut tail: Vec<String> = Vec::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        debug!(stderr = %trimmed, "Process stderr");
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.remove(0);
                        }
                        tail.push(trimmed.to_string());
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error reading process stderr");
                    break;
                }
            }
        }
        tail.join("\n")
    });

    let stdout_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut output = String::new();
        let _ = reader.read_to_string(&mut output).await;
        output
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            info!(program = %program, "Cancelled, killing process");
            let _ = child.kill().await;
            return Err(MediaError::Cancelled);
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();
    let stdout = stdout_task.await.unwrap_or_default();

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        return Err(MediaError::ProcessError {
            program: program.to_string(),
            code,
            stderr: stderr_tail,
        });
    }
    Ok(stdout)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn seconds_arg(seconds: f64) -> String {
    format!("{:.3}", seconds.max(0.0))
}

/// Mono 16 kHz MP3 for the speech provider.
pub fn extract_audio_args(video: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-i".to_string(), path_arg(video)];
    args.extend(
        ["-vn", "-acodec", "libmp3lame", "-ar", "16000", "-ac", "1", "-ab", "160k"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(path_arg(output));
    args
}

/// Stream-copy the `[start, end]` span of `video` into `output`.
pub fn cut_args(video: &Path, start: f64, end: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(video),
        "-ss".to_string(),
        seconds_arg(start),
        "-to".to_string(),
        seconds_arg(end),
        "-c".to_string(),
        "copy".to_string(),
        "-avoid_negative_ts".to_string(),
        "1".to_string(),
        path_arg(output),
    ]
}

/// Concatenate the files listed in `list` (concat demuxer format).
pub fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        path_arg(list),
        "-c".to_string(),
        "copy".to_string(),
        path_arg(output),
    ]
}

/// Burn `srt_name` (relative to the working directory) into `video`.
pub fn subtitle_args(video: &Path, srt_name: &str, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        path_arg(video),
        "-vf".to_string(),
        format!("subtitles={srt_name}"),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        path_arg(output),
    ]
}

pub fn probe_duration_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path_arg(path),
    ]
}

/// Body of a concat demuxer list file for `clips`.
pub fn concat_list(clips: &[impl AsRef<Path>]) -> String {
    clips
        .iter()
        .map(|p| {
            let escaped = p.as_ref().to_string_lossy().replace('\'', "'\\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_extract_audio_args() {
        let args = extract_audio_args(Path::new("/in/a.mp4"), Path::new("/ws/temp/a_audio.mp3"));
        assert_eq!(args[..3], ["-y", "-i", "/in/a.mp4"]);
        assert!(args.windows(2).any(|w| w == ["-ar", "16000"]));
        assert!(args.windows(2).any(|w| w == ["-acodec", "libmp3lame"]));
        assert_eq!(args.last().unwrap(), "/ws/temp/a_audio.mp3");
    }

    #[test]
    fn test_cut_args_format_seconds() {
        let args = cut_args(Path::new("a.mp4"), 1.5, 62.25, Path::new("clip_1.mp4"));
        assert!(args.windows(2).any(|w| w == ["-ss", "1.500"]));
        assert!(args.windows(2).any(|w| w == ["-to", "62.250"]));
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let clips = vec![PathBuf::from("/ws/cuts/clip_1.mp4"), PathBuf::from("/ws/it's.mp4")];
        assert_eq!(
            concat_list(&clips),
            "file '/ws/cuts/clip_1.mp4'\nfile '/ws/it'\\''s.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_program("/nonexistent/ffmpeg", &[], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_process_reports_stderr() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = run_program("sh", &args, None, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            MediaError::ProcessError { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_is_returned() {
        let args = vec!["-c".to_string(), "echo 12.5".to_string()];
        let out = run_program("sh", &args, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.trim(), "12.5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let cancel = CancellationToken::new();
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            run_program("sh", &args, None, &cancel),
        )
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }
}
