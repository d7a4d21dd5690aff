//! Clip-cut instructions: parsing analyser output, the default selection used
//! when analysis is unavailable, and the `clip_order.txt` format.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::timecode::{format_timestamp, parse_timestamp};
use crate::transcript::MergedTranscript;

/// Spans overlapping an earlier span of the same video by more than this
/// fraction of the shorter span are treated as duplicates.
const DUPLICATE_OVERLAP_RATIO: f64 = 0.8;

/// One segment to cut from a source video, in final playback order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInstruction {
    /// Video label (input name without extension).
    pub video: String,
    /// Start offset in seconds.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
}

impl ClipInstruction {
    pub fn new(video: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            video: video.into(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    fn overlap_ratio(&self, other: &ClipInstruction) -> f64 {
        let overlap = self.end.min(other.end) - self.start.max(other.start);
        if overlap <= 0.0 {
            return 0.0;
        }
        let shorter = self.duration().min(other.duration());
        if shorter <= 0.0 {
            return 0.0;
        }
        overlap / shorter
    }
}

/// Parse analyser output into instructions, keeping the order the lines
/// appear in.
///
/// `=== name ===` lines select the current video; `[start - end] text` lines
/// become instructions for it. Lines before any header, malformed spans,
/// spans with `start >= end`, and near-duplicates of an earlier span on the
/// same video are dropped.
pub fn parse_clip_selection(text: &str) -> Vec<ClipInstruction> {
    let mut clips: Vec<ClipInstruction> = Vec::new();
    let mut current_video: Option<String> = None;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("===") {
            let name = line.trim_matches(|c: char| c == '=' || c.is_whitespace());
            current_video = (!name.is_empty()).then(|| name.to_string());
            continue;
        }
        let Some(video) = current_video.as_deref() else {
            continue;
        };
        let Some((start, end)) = parse_span_line(line) else {
            continue;
        };
        if start >= end {
            continue;
        }

        let candidate = ClipInstruction::new(video, start, end);
        let duplicate = clips
            .iter()
            .filter(|c| c.video == candidate.video)
            .any(|c| c.overlap_ratio(&candidate) > DUPLICATE_OVERLAP_RATIO);
        if !duplicate {
            clips.push(candidate);
        }
    }

    clips
}

/// Parse the `[start - end]` prefix of a transcript line.
fn parse_span_line(line: &str) -> Option<(f64, f64)> {
    let rest = line.strip_prefix('[')?;
    let (span, _) = rest.split_once(']')?;
    let (start, end) = span.split_once(" - ")?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Default selection used when analysis fails and degrading is allowed: one
/// instruction per video covering its whole transcribed span.
pub fn default_selection(merged: &MergedTranscript) -> Vec<ClipInstruction> {
    merged
        .transcripts
        .iter()
        .filter_map(|t| {
            let (start, end) = t.span()?;
            (end > start).then(|| ClipInstruction::new(t.source.clone(), start, end))
        })
        .collect()
}

/// Merge consecutive instructions on the same video whose gap is at most
/// `adjacent_gap` seconds, then pad every end by `end_padding` seconds.
///
/// Playback order is never changed; only neighbours are merged.
pub fn merge_adjacent(clips: &[ClipInstruction], adjacent_gap: f64, end_padding: f64) -> Vec<ClipInstruction> {
    let mut merged: Vec<ClipInstruction> = Vec::with_capacity(clips.len());
    for clip in clips {
        match merged.last_mut() {
            Some(prev) if prev.video == clip.video && clip.start - prev.end <= adjacent_gap => {
                prev.end = prev.end.max(clip.end);
            }
            _ => merged.push(clip.clone()),
        }
    }
    for clip in &mut merged {
        clip.end += end_padding;
    }
    merged
}

/// Render instructions in `clip_order.txt` format (`video\tstart\tend`).
pub fn to_clip_order(clips: &[ClipInstruction]) -> String {
    let mut out = String::new();
    for clip in clips {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            clip.video,
            format_timestamp(clip.start),
            format_timestamp(clip.end)
        );
    }
    out
}
