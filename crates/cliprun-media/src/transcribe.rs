//! Speech-to-text through an OpenAI-compatible `/audio/transcriptions` API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info, warn};

use cliprun_core::{Sentence, StageError, Transcript, VideoInput};
use cliprun_orchestrator::{RemoteObject, StageContext, Transcriber};

use crate::error::MediaError;

/// Transcription client.
#[derive(Debug, Clone)]
pub struct OpenAiTranscriber {
    inner: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    start: f64,
    end: f64,
    text: String,
}

impl OpenAiTranscriber {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            timeout,
        }
    }

    async fn request(&self, object: &RemoteObject) -> Result<TranscriptionResponse, MediaError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| MediaError::NotConfigured("ASR_API_KEY".to_string()))?;

        let audio = tokio::fs::read(&object.local_path).await?;
        let file_name = object
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let part = Part::bytes(audio).file_name(file_name).mime_str("audio/mpeg")?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(url = %url, object = %object.uri, "POST request");

        let response = self
            .inner
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(timeout_or_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(timeout_or_http)
    }
}

fn timeout_or_http(e: reqwest::Error) -> MediaError {
    if e.is_timeout() {
        MediaError::Timeout
    } else {
        MediaError::Http(e)
    }
}

/// Sentences from provider segments, dropping blank ones.
fn to_sentences(segments: Vec<Segment>) -> Vec<Sentence> {
    segments
        .into_iter()
        .filter_map(|s| {
            let text = s.text.trim();
            (!text.is_empty() && s.end > s.start).then(|| Sentence::new(s.start, s.end, text))
        })
        .collect()
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(
        &self,
        ctx: &StageContext,
        input: &VideoInput,
        object: &RemoteObject,
    ) -> Result<Transcript, StageError> {
        let response = tokio::select! {
            result = self.request(object) => result,
            _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
        };

        let response = match response {
            Ok(r) => r,
            Err(MediaError::Timeout) => {
                warn!(input = %input.name, timeout = ?self.timeout, "Transcription timed out");
                return Err(StageError::TranscriptionTimeout(format!(
                    "{}: no result after {}s",
                    input.name,
                    self.timeout.as_secs()
                )));
            }
            Err(e) => return Err(e.into_stage(StageError::TranscriptionFailed)),
        };

        let sentences = to_sentences(response.segments);
        info!(
            task_id = %ctx.task_id,
            input = %input.name,
            sentences = sentences.len(),
            "Transcription received"
        );
        Ok(Transcript::new(input.stem(), sentences))
    }
}
