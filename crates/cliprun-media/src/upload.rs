//! Uploaders that make extracted audio reachable by the transcriber.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use cliprun_core::StageError;
use cliprun_orchestrator::{RemoteObject, StageContext, Uploader};

use crate::error::MediaError;

/// Hands the local file to the transcriber as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalUploader;

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(&self, _ctx: &StageContext, audio: &Path) -> Result<RemoteObject, StageError> {
        let meta = tokio::fs::metadata(audio)
            .await
            .map_err(|e| StageError::UploadFailed(format!("{}: {e}", audio.display())))?;
        if !meta.is_file() {
            return Err(StageError::UploadFailed(format!(
                "{}: not a regular file",
                audio.display()
            )));
        }
        Ok(RemoteObject {
            uri: format!("file://{}", audio.display()),
            local_path: audio.to_path_buf(),
        })
    }
}

/// PUTs audio to `<base_url>/<task_id>/<file name>`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpUploader {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            inner: client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Object URL for `audio` uploaded by `task_id`.
    pub fn object_url(&self, task_id: &str, audio: &Path) -> Option<String> {
        let name = audio.file_name()?.to_str()?;
        Some(format!("{}/{}/{}", self.base_url, task_id, name))
    }

    async fn put(&self, url: &str, audio: &Path) -> Result<(), MediaError> {
        let body = tokio::fs::read(audio).await?;
        debug!(url = %url, bytes = body.len(), "PUT request");

        let response = self
            .inner
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "audio/mpeg")
            .body(body)
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
        Ok(())
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, ctx: &StageContext, audio: &Path) -> Result<RemoteObject, StageError> {
        let url = self
            .object_url(ctx.task_id.as_str(), audio)
            .ok_or_else(|| StageError::UploadFailed(format!("invalid file name {}", audio.display())))?;

        tokio::select! {
            result = self.put(&url, audio) => {
                result.map_err(|e| e.into_stage(StageError::UploadFailed))?
            }
            _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
        }

        info!(task_id = %ctx.task_id, url = %url, "Audio uploaded");
        Ok(RemoteObject {
            uri: url,
            local_path: audio.to_path_buf(),
        })
    }
}
