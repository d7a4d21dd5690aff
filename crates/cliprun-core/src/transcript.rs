//! Transcripts produced by the transcription stage and their merged form.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::clip::ClipInstruction;
use crate::error::StageError;
use crate::timecode::{format_srt_timestamp, format_timestamp};

/// One recognised sentence, timed in seconds from the start of its video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    #[serde(rename = "start_time")]
    pub start: f64,
    #[serde(rename = "end_time")]
    pub end: f64,
    pub text: String,
}

impl Sentence {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Ordered sentences for one input video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Video label (input name without extension).
    pub source: String,
    pub sentences: Vec<Sentence>,
}

impl Transcript {
    pub fn new(source: impl Into<String>, sentences: Vec<Sentence>) -> Self {
        Self {
            source: source.into(),
            sentences,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Span from the first sentence start to the last sentence end.
    pub fn span(&self) -> Option<(f64, f64)> {
        let first = self.sentences.first()?;
        let last = self.sentences.last()?;
        Some((first.start, last.end))
    }
}

/// All usable per-video transcripts rendered into one analysable document.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTranscript {
    /// Rendered text (`=== name ===` headers, `[start - end] text` lines).
    pub text: String,
    /// The transcripts that were merged, in input order.
    pub transcripts: Vec<Transcript>,
}

impl MergedTranscript {
    /// Merge transcripts in the given order, skipping empty ones.
    pub fn merge(transcripts: Vec<Transcript>) -> Result<Self, StageError> {
        let transcripts: Vec<Transcript> =
            transcripts.into_iter().filter(|t| !t.is_empty()).collect();
        if transcripts.is_empty() {
            return Err(StageError::MergeFailed(
                "no transcript contains any sentence".to_string(),
            ));
        }

        let mut text = String::new();
        for transcript in &transcripts {
            let _ = write!(text, "\n=== {} ===\n", transcript.source);
            for s in &transcript.sentences {
                let _ = writeln!(
                    text,
                    "[{} - {}] {}",
                    format_timestamp(s.start),
                    format_timestamp(s.end),
                    s.text
                );
            }
        }

        Ok(Self { text, transcripts })
    }

    pub fn find(&self, source: &str) -> Option<&Transcript> {
        self.transcripts.iter().find(|t| t.source == source)
    }

    /// Map source sentences onto the timeline of a video made by concatenating
    /// `clips` in order.
    pub fn align_to_clips(&self, clips: &[ClipInstruction]) -> Vec<Sentence> {
        let mut aligned = Vec::new();
        let mut offset = 0.0;
        for clip in clips {
            if let Some(transcript) = self.find(&clip.video) {
                for s in &transcript.sentences {
                    let start = s.start.max(clip.start);
                    let end = s.end.min(clip.end);
                    if end > start {
                        aligned.push(Sentence::new(
                            start - clip.start + offset,
                            end - clip.start + offset,
                            s.text.clone(),
                        ));
                    }
                }
            }
            offset += clip.duration();
        }
        aligned
    }
}

/// Render sentences as an SRT subtitle document.
pub fn to_srt(sentences: &[Sentence]) -> String {
    let mut out = String::new();
    for (i, s) in sentences.iter().enumerate() {
        let end = if s.end - s.start < 0.1 { s.start + 0.1 } else { s.end };
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_srt_timestamp(s.start),
            format_srt_timestamp(end)
        );
        let _ = writeln!(out, "{}\n", s.text);
    }
    out
}
