//! ffmpeg and HTTP-provider implementations of the pipeline collaborators.
//!
//! [`build_collaborators`] wires the default set from a [`MediaConfig`]:
//! ffmpeg for extraction, cutting, merging and subtitle burn-in, an
//! OpenAI-compatible transcription endpoint and a chat-completions analyzer.

mod analyze;
mod audio;
mod config;
mod cutter;
mod error;
mod ffmpeg;
mod merge;
mod subtitles;
mod transcribe;
mod upload;

#[cfg(test)]
mod test_server;

use std::sync::Arc;

use cliprun_orchestrator::{Collaborators, TextTranscriptMerger, Uploader};

pub use analyze::{build_user_prompt, ChatAnalyzer, RetryPolicy};
pub use audio::FfmpegAudioExtractor;
pub use config::{MediaConfig, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_HINT};
pub use cutter::{clamp_to_duration, FfmpegClipCutter};
pub use error::MediaError;
pub use ffmpeg::FfmpegTool;
pub use merge::FfmpegVideoMerger;
pub use subtitles::FfmpegSubtitleRenderer;
pub use transcribe::OpenAiTranscriber;
pub use upload::{HttpUploader, LocalUploader};

/// Build the production collaborator set.
pub fn build_collaborators(config: &MediaConfig) -> Result<Collaborators, MediaError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("cliprun/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let tool = FfmpegTool::new(&config.ffmpeg_path, &config.ffprobe_path);

    let uploader: Arc<dyn Uploader> = match config.upload_base_url.as_deref() {
        Some(base_url) => Arc::new(HttpUploader::new(client.clone(), base_url)),
        None => Arc::new(LocalUploader),
    };

    Ok(Collaborators {
        extractor: Arc::new(FfmpegAudioExtractor::new(tool.clone())),
        uploader,
        transcriber: Arc::new(OpenAiTranscriber::new(
            client.clone(),
            &config.asr_base_url,
            config.asr_api_key.clone(),
            config.asr_model.clone(),
            config.asr_timeout,
        )),
        transcript_merger: Arc::new(TextTranscriptMerger),
        analyzer: Arc::new(ChatAnalyzer::new(client, config)),
        cutter: Arc::new(FfmpegClipCutter::new(tool.clone())),
        video_merger: Arc::new(FfmpegVideoMerger::new(tool.clone())),
        subtitles: Arc::new(FfmpegSubtitleRenderer::new(tool)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_collaborators_without_keys() {
        assert!(build_collaborators(&MediaConfig::default()).is_ok());

        let config = MediaConfig {
            upload_base_url: Some("https://bucket.example.com".to_string()),
            ..MediaConfig::default()
        };
        assert!(build_collaborators(&config).is_ok());
    }
}
