//! Pipeline stage names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the highlight pipeline, in execution order.
///
/// `Extract`, `Upload` and `Transcribe` run once per input video; the rest run
/// once over the aggregate. `Workspace` is not a collaborator call; it
/// attributes failures to preparing the task's directory at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Workspace,
    Extract,
    Upload,
    Transcribe,
    MergeTranscripts,
    Analyze,
    Cut,
    MergeVideo,
    AddSubtitles,
}

impl Stage {
    /// Stable name used in error attribution and progress events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Extract => "extract",
            Self::Upload => "upload",
            Self::Transcribe => "transcribe",
            Self::MergeTranscripts => "merge-transcripts",
            Self::Analyze => "analyze",
            Self::Cut => "cut",
            Self::MergeVideo => "merge-video",
            Self::AddSubtitles => "add-subtitles",
        }
    }

    /// Returns true for stages executed once per input video.
    pub fn is_per_video(&self) -> bool {
        matches!(self, Self::Extract | Self::Upload | Self::Transcribe)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Analyze.to_string(), "analyze");
        assert_eq!(Stage::MergeTranscripts.as_str(), "merge-transcripts");
        assert!(Stage::Upload.is_per_video());
        assert!(!Stage::Cut.is_per_video());
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&Stage::AddSubtitles).unwrap();
        assert_eq!(json, "\"add-subtitles\"");
    }
}
