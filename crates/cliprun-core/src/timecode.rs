//! `HH:MM:SS.mmm` timestamps used in transcripts and clip instructions.

/// Format seconds as `HH:MM:SS.mmm`. Negative values clamp to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_srt_timestamp(seconds: f64) -> String {
    format_timestamp(seconds).replacen('.', ",", 1)
}

/// Parse `HH:MM:SS[.fff]`, `MM:SS[.fff]` or `SS[.fff]` into seconds.
///
/// Returns `None` for anything else, including negative components.
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        let value: f64 = if is_last {
            part.parse().ok()?
        } else {
            part.parse::<u32>().ok()? as f64
        };
        if value < 0.0 || !value.is_finite() {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}
