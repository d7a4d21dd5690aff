//! Clip cutting with ffmpeg stream copy.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use cliprun_core::input::SUPPORTED_VIDEO_EXTENSIONS;
use cliprun_core::{ClipInstruction, StageError, VideoInput};
use cliprun_orchestrator::{ClipCutter, CutClip, CutOutput, StageContext};

use crate::error::MediaError;
use crate::ffmpeg::{cut_args, FfmpegTool};

/// Cuts `cuts/clip_<n>.mp4` for every instruction it can satisfy.
///
/// Instructions naming an unknown video, or starting past the end of their
/// video, are skipped. Ends past the end of the video are clamped.
#[derive(Debug, Clone)]
pub struct FfmpegClipCutter {
    tool: FfmpegTool,
}

impl FfmpegClipCutter {
    pub fn new(tool: FfmpegTool) -> Self {
        Self { tool }
    }
}

/// Clamp `clip` to a video of `duration` seconds. Returns the reason the clip
/// cannot be cut at all.
pub fn clamp_to_duration(clip: &ClipInstruction, duration: Option<f64>) -> Result<ClipInstruction, String> {
    let Some(duration) = duration else {
        return Ok(clip.clone());
    };
    if clip.start >= duration {
        return Err(format!(
            "starts at {:.3}s but the video is only {:.3}s long",
            clip.start, duration
        ));
    }
    Ok(ClipInstruction::new(
        clip.video.clone(),
        clip.start,
        clip.end.min(duration),
    ))
}

/// Source named by a clip label: the exact stem, or the label with a
/// trailing video extension removed (`talk.mp4` → `talk`).
fn find_source<'a>(by_stem: &HashMap<&str, &'a VideoInput>, label: &str) -> Option<&'a VideoInput> {
    if let Some(&source) = by_stem.get(label) {
        return Some(source);
    }
    let lower = label.to_ascii_lowercase();
    let ext = SUPPORTED_VIDEO_EXTENSIONS.iter().find(|ext| lower.ends_with(**ext))?;
    let stem = label.get(..label.len() - ext.len())?;
    by_stem.get(stem).copied()
}

#[async_trait]
impl ClipCutter for FfmpegClipCutter {
    async fn cut(
        &self,
        ctx: &StageContext,
        clips: &[ClipInstruction],
        sources: &[VideoInput],
    ) -> Result<CutOutput, StageError> {
        let by_stem: HashMap<&str, &VideoInput> = sources.iter().map(|s| (s.stem(), s)).collect();
        let mut durations: HashMap<&str, Option<f64>> = HashMap::new();
        let mut output = CutOutput::default();

        for (i, clip) in clips.iter().enumerate() {
            let Some(source) = find_source(&by_stem, &clip.video) else {
                output
                    .skipped
                    .push((clip.clone(), format!("no input named '{}'", clip.video)));
                continue;
            };

            let duration = match durations.get(source.stem()) {
                Some(d) => *d,
                None => {
                    let d = match self.tool.probe_duration(&source.path, &ctx.cancel).await {
                        Ok(d) => Some(d),
                        Err(MediaError::Cancelled) => return Err(StageError::Cancelled),
                        Err(e) => {
                            warn!(input = %source.name, error = %e, "Could not probe duration");
                            None
                        }
                    };
                    durations.insert(source.stem(), d);
                    d
                }
            };

            let clip = match clamp_to_duration(clip, duration) {
                Ok(c) => c,
                Err(reason) => {
                    output.skipped.push((clip.clone(), reason));
                    continue;
                }
            };

            let path = ctx.workspace.clip_path(i + 1);
            let args = cut_args(&source.path, clip.start, clip.end, &path);
            match self.tool.run(&args, &ctx.cancel).await {
                Ok(()) => {
                    info!(
                        task_id = %ctx.task_id,
                        video = %clip.video,
                        start = clip.start,
                        end = clip.end,
                        "Clip cut"
                    );
                    output.clips.push(CutClip {
                        instruction: clip,
                        path,
                    });
                }
                Err(MediaError::Cancelled) => return Err(StageError::Cancelled),
                Err(e) => output.skipped.push((clip, e.to_string())),
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliprun_core::TaskId;
    use cliprun_orchestrator::Workspace;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_clamp_to_duration() {
        let clip = ClipInstruction::new("a", 10.0, 30.0);
        assert_eq!(clamp_to_duration(&clip, None).unwrap(), clip);
        assert_eq!(clamp_to_duration(&clip, Some(20.0)).unwrap().end, 20.0);
        assert_eq!(clamp_to_duration(&clip, Some(60.0)).unwrap().end, 30.0);
        assert!(clamp_to_duration(&clip, Some(10.0)).is_err());
    }

    #[tokio::test]
    async fn test_unknown_videos_are_skipped() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::new("task_cut");
        let ctx = StageContext {
            task_id: id.clone(),
            workspace: Workspace::create(dir.path(), &id).await.unwrap(),
            cancel: CancellationToken::new(),
        };
        let cutter = FfmpegClipCutter::new(FfmpegTool::default());
        let clips = vec![ClipInstruction::new("ghost", 0.0, 5.0)];

        let output = cutter
            .cut(&ctx, &clips, &[VideoInput::from_path("/v/a.mp4")])
            .await
            .unwrap();
        assert!(output.clips.is_empty());
        assert_eq!(output.skipped.len(), 1);
        assert!(output.skipped[0].1.contains("ghost"));
    }

    #[test]
    fn test_find_source_accepts_label_with_extension() {
        let sources = [VideoInput::from_path("/v/a.mp4"), VideoInput::from_path("/v/b.final.mov")];
        let by_stem: HashMap<&str, &VideoInput> = sources.iter().map(|s| (s.stem(), s)).collect();

        assert_eq!(find_source(&by_stem, "a").unwrap().name, "a.mp4");
        assert_eq!(find_source(&by_stem, "a.mp4").unwrap().name, "a.mp4");
        assert_eq!(find_source(&by_stem, "a.MP4").unwrap().name, "a.mp4");
        assert_eq!(find_source(&by_stem, "b.final.mov").unwrap().name, "b.final.mov");
        assert!(find_source(&by_stem, "a.txt").is_none());
        assert!(find_source(&by_stem, "c.mp4").is_none());
    }

    #[tokio::test]
    async fn test_label_with_extension_reaches_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let id = TaskId::new("task_cut_ext");
        let ctx = StageContext {
            task_id: id.clone(),
            workspace: Workspace::create(dir.path(), &id).await.unwrap(),
            cancel: CancellationToken::new(),
        };
        let cutter = FfmpegClipCutter::new(FfmpegTool::new(
            "/nonexistent/bin/ffmpeg",
            "/nonexistent/bin/ffprobe",
        ));
        let clips = vec![ClipInstruction::new("a.mp4", 0.0, 5.0)];

        let output = cutter
            .cut(&ctx, &clips, &[VideoInput::from_path("/v/a.mp4")])
            .await
            .unwrap();
        assert_eq!(output.skipped.len(), 1);
        let reason = &output.skipped[0].1;
        assert!(!reason.contains("no input named"), "unexpected reason: {reason}");
        assert!(reason.contains("not found"));
    }
}
