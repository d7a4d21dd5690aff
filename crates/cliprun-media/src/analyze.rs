//! Clip selection through an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cliprun_core::clip::parse_clip_selection;
use cliprun_core::{MergedTranscript, StageError};
use cliprun_orchestrator::{Analysis, Analyzer, StageContext};

use crate::config::{MediaConfig, DEFAULT_USER_HINT};
use crate::error::MediaError;

/// Retry schedule for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based): `2^(attempt-1)` seconds
    /// clamped to `[min_wait, max_wait]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(20));
        exp.max(self.min_wait).min(self.max_wait)
    }
}

#[derive(Debug, Clone)]
pub struct ChatAnalyzer {
    inner: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatAnalyzer {
    pub fn new(client: reqwest::Client, config: &MediaConfig) -> Self {
        Self {
            inner: client,
            base_url: config.ai_base_url.trim_end_matches('/').to_string(),
            api_key: config.ai_api_key.clone(),
            model: config.ai_model.clone(),
            system_prompt: config.ai_system_prompt.clone(),
            timeout: config.ai_timeout,
            retry: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                min_wait: config.retry_min_wait,
                max_wait: config.retry_max_wait,
            },
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            attempts: retry.attempts.max(1),
            ..retry
        };
        self
    }

    /// Send the chat request, retrying transient failures.
    async fn complete(&self, user_prompt: &str, cancel: &CancellationToken) -> Result<String, MediaError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| MediaError::NotConfigured("AI_API_KEY".to_string()))?;

        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                result = self.send(api_key, user_prompt) => result,
                _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            };
            match result {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    let wait = self.retry.backoff(attempt);
                    warn!(attempt, wait = ?wait, error = %e, "Analysis request failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(MediaError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, api_key: &str, user_prompt: &str) -> Result<String, MediaError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.5,
            stream: false,
        };
        debug!(url = %url, model = %self.model, "POST request");

        let response = self
            .inner
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        parse_completion(&body)
    }
}

/// The user message: the caller's hint followed by the merged transcript.
pub fn build_user_prompt(hint: Option<&str>, merged: &MergedTranscript) -> String {
    let hint = hint.map(str::trim).filter(|h| !h.is_empty()).unwrap_or(DEFAULT_USER_HINT);
    format!("{hint}\n\nTranscripts:\n\n{}", merged.text.trim())
}

fn parse_completion(body: &str) -> Result<String, MediaError> {
    let response: ChatResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| MediaError::InvalidResponse("completion has no content".to_string()))
}

#[async_trait]
impl Analyzer for ChatAnalyzer {
    async fn analyze(
        &self,
        ctx: &StageContext,
        merged: &MergedTranscript,
        prompt: Option<&str>,
    ) -> Result<Analysis, StageError> {
        let user_prompt = build_user_prompt(prompt, merged);
        let text = self
            .complete(&user_prompt, &ctx.cancel)
            .await
            .map_err(|e| e.into_stage(StageError::AnalysisFailed))?;

        let clips = parse_clip_selection(&text);
        info!(task_id = %ctx.task_id, clips = clips.len(), "Analysis complete");
        Ok(Analysis {
            important_dialogues: text,
            clips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cliprun_core::{Sentence, TaskId, Transcript};
    use cliprun_orchestrator::Workspace;
    use tempfile::TempDir;

    use crate::test_server::serve;

    const FAST_RETRY: RetryPolicy = RetryPolicy {
        attempts: 3,
        min_wait: Duration::from_millis(1),
        max_wait: Duration::from_millis(5),
    };

    fn merged() -> MergedTranscript {
        MergedTranscript::merge(vec![Transcript::new(
            "talk",
            vec![Sentence::new(1.0, 4.0, "the key point")],
        )])
        .unwrap()
    }

    fn analyzer(base_url: &str) -> ChatAnalyzer {
        let config = MediaConfig {
            ai_api_key: Some("sk-test".to_string()),
            ai_base_url: base_url.to_string(),
            ..MediaConfig::default()
        };
        ChatAnalyzer::new(reqwest::Client::new(), &config).with_retry(FAST_RETRY)
    }

    async fn context(dir: &TempDir) -> StageContext {
        let id = TaskId::new("task_ai");
        StageContext {
            task_id: id.clone(),
            workspace: Workspace::create(dir.path(), &id).await.unwrap(),
            cancel: CancellationToken::new(),
        }
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            attempts: 5,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
    }

    #[test]
    fn test_user_prompt() {
        let prompt = build_user_prompt(Some("  only jokes "), &merged());
        assert!(prompt.starts_with("only jokes\n\nTranscripts:\n\n"));
        assert!(prompt.contains("the key point"));

        let prompt = build_user_prompt(Some(""), &merged());
        assert!(prompt.starts_with(DEFAULT_USER_HINT));
    }

    #[test]
    fn test_parse_completion() {
        assert_eq!(parse_completion(&completion(" picked ")).unwrap(), "picked");
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(MediaError::InvalidResponse(_))
        ));
        assert!(matches!(parse_completion("not json"), Err(MediaError::JsonError(_))));
    }

    #[tokio::test]
    async fn test_analyze_parses_selection() {
        let server = serve(vec![(
            200,
            completion("=== talk ===\n[00:00:01.000 - 00:00:04.000] the key point"),
        )])
        .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let analysis = analyzer(&server.base_url)
            .analyze(&ctx, &merged(), Some("focus"))
            .await
            .unwrap();
        assert_eq!(analysis.clips.len(), 1);
        assert_eq!(analysis.clips[0].video, "talk");
        assert_eq!(analysis.clips[0].start, 1.0);
        assert!(analysis.important_dialogues.contains("the key point"));

        let request = &server.requests()[0];
        assert!(request.starts_with("POST /chat/completions"));
        assert!(request.contains("Bearer sk-test"));
        assert!(request.contains("deepseek-chat"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = serve(vec![
            (503, r#"{"error":"busy"}"#.to_string()),
            (200, completion("=== talk ===\n[00:00:01 - 00:00:02] hi")),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let analysis = analyzer(&server.base_url)
            .analyze(&ctx, &merged(), None)
            .await
            .unwrap();
        assert_eq!(analysis.clips.len(), 1);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = serve(vec![(400, r#"{"error":"bad request"}"#.to_string())]).await;
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let err = analyzer(&server.base_url)
            .analyze(&ctx, &merged(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::AnalysisFailed(_)));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = serve(vec![(500, "{}".to_string())]).await;
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;

        let err = analyzer(&server.base_url)
            .analyze(&ctx, &merged(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::AnalysisFailed(msg) if msg.contains("500")));
        assert_eq!(server.hits(), 3);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let analyzer = ChatAnalyzer::new(reqwest::Client::new(), &MediaConfig::default());

        let err = analyzer.analyze(&ctx, &merged(), None).await.unwrap_err();
        assert!(matches!(err, StageError::AnalysisFailed(msg) if msg.contains("AI_API_KEY")));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let server = serve(vec![(503, "{}".to_string())]).await;
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir).await;
        let slow = analyzer(&server.base_url).with_retry(RetryPolicy {
            attempts: 3,
            min_wait: Duration::from_secs(30),
            max_wait: Duration::from_secs(30),
        });

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let err = slow.analyze(&ctx, &merged(), None).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
