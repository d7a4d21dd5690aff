//! Error types for the media collaborators.

use cliprun_core::StageError;
use thiserror::Error;

/// Errors that can occur while running ffmpeg or talking to a provider.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Executable not found.
    #[error("'{0}' not found. Ensure it is installed and on PATH.")]
    NotFound(String),

    /// Failed to spawn the process.
    #[error("Failed to spawn process: {0}")]
    SpawnError(#[from] std::io::Error),

    /// Process exited with an error.
    #[error("{program} exited with code {code}: {stderr}")]
    ProcessError {
        program: String,
        code: i32,
        stderr: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The provider answered with something we cannot use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A required setting is missing.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Timeout waiting for the provider.
    #[error("Timeout waiting for response")]
    Timeout,

    /// The task was cancelled while the call was in flight.
    #[error("Cancelled")]
    Cancelled,
}

impl MediaError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status >= 500,
            Self::Timeout => true,
            _ => false,
        }
    }

    /// Convert into the stage error the runner understands, using `wrap` for
    /// everything that is not a cancellation.
    pub fn into_stage(self, wrap: fn(String) -> StageError) -> StageError {
        match self {
            Self::Cancelled => StageError::Cancelled,
            other => wrap(other.to_string()),
        }
    }
}
