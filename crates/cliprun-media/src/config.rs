//! Settings for the ffmpeg tools and the speech/chat providers.

use std::time::Duration;

/// Prompt sent as the system message when `AI_SYSTEM_PROMPT` is unset.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a professional transcript editor. You read transcripts of audio or video \
recordings, find the passages that matter, and assemble them into a coherent highlight cut.

Reply using exactly the input format and add nothing else:

=== file name ===
[00:00:00.000 - 00:00:05.000] sentence text

The order of the lines you return is the playback order of the final video. You may \
rearrange passages freely, including moving a passage from a later video to the front. \
Keep every passage under its `=== name ===` header (name without extension) with its \
`[start - end]` timestamps unchanged.

Drop passages that repeat or closely resemble one another and keep only the most \
representative one.";

/// Hint used when the caller gives no prompt.
pub const DEFAULT_USER_HINT: &str = "Extract the important dialogue and keep the timestamp format.";

/// Media collaborator configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    /// Key for the chat-completions provider used by the analyzer.
    pub ai_api_key: Option<String>,
    pub ai_base_url: String,
    pub ai_model: String,
    /// Per-request timeout for the analyzer.
    pub ai_timeout: Duration,
    pub ai_system_prompt: String,

    /// Key for the transcription provider.
    pub asr_api_key: Option<String>,
    pub asr_base_url: String,
    pub asr_model: String,
    /// Per-request timeout for transcription.
    pub asr_timeout: Duration,

    /// Where audio is uploaded before transcription. Local files are used
    /// directly when unset.
    pub upload_base_url: Option<String>,

    /// Attempts per analyzer call, including the first.
    pub retry_attempts: u32,
    pub retry_min_wait: Duration,
    pub retry_max_wait: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ai_api_key: None,
            ai_base_url: "https://api.deepseek.com/v1".to_string(),
            ai_model: "deepseek-chat".to_string(),
            ai_timeout: Duration::from_secs(120),
            ai_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            asr_api_key: None,
            asr_base_url: "https://api.openai.com/v1".to_string(),
            asr_model: "whisper-1".to_string(),
            asr_timeout: Duration::from_secs(1800),
            upload_base_url: None,
            retry_attempts: 3,
            retry_min_wait: Duration::from_secs(1),
            retry_max_wait: Duration::from_secs(10),
        }
    }
}

impl MediaConfig {
    /// Build [`MediaConfig`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`MediaConfig`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse_secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            ffmpeg_path: non_empty("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: non_empty("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            ai_api_key: non_empty("AI_API_KEY").or_else(|| non_empty("DEEPSEEK_API_KEY")),
            ai_base_url: non_empty("AI_BASE_URL")
                .or_else(|| non_empty("DEEPSEEK_API_URL"))
                .unwrap_or(defaults.ai_base_url),
            ai_model: non_empty("AI_MODEL")
                .or_else(|| non_empty("DEEPSEEK_MODEL"))
                .unwrap_or(defaults.ai_model),
            ai_timeout: parse_secs("AI_TIMEOUT", defaults.ai_timeout),
            ai_system_prompt: non_empty("AI_SYSTEM_PROMPT").unwrap_or(defaults.ai_system_prompt),
            asr_api_key: non_empty("ASR_API_KEY"),
            asr_base_url: non_empty("ASR_BASE_URL").unwrap_or(defaults.asr_base_url),
            asr_model: non_empty("ASR_MODEL").unwrap_or(defaults.asr_model),
            asr_timeout: parse_secs("ASR_TIMEOUT", defaults.asr_timeout),
            upload_base_url: non_empty("UPLOAD_BASE_URL"),
            retry_attempts: lookup("RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.retry_attempts),
            retry_min_wait: parse_secs("RETRY_MIN_WAIT", defaults.retry_min_wait),
            retry_max_wait: parse_secs("RETRY_MAX_WAIT", defaults.retry_max_wait),
        }
    }
}
