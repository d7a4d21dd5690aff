//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// What to do when the analysis stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPolicy {
    /// Analysis failure fails the task.
    Strict,
    /// Fall back to the default clip selection and keep going.
    DegradeToDefault,
}

impl AnalysisPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "false" | "0" | "no" => Some(Self::Strict),
            "degrade" | "degrade-to-default" | "true" | "1" | "yes" => {
                Some(Self::DegradeToDefault)
            }
            _ => None,
        }
    }
}

/// What happens to a task directory when its Registry entry is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRetention {
    /// Leave everything on disk.
    Keep,
    /// Remove `temp/` and `cuts/`, keep the named artifacts.
    PurgeIntermediates,
    /// Remove the whole task directory.
    Purge,
}

impl WorkspaceRetention {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" => Some(Self::Keep),
            "purge-intermediates" | "purge_intermediates" => Some(Self::PurgeIntermediates),
            "purge" => Some(Self::Purge),
            _ => None,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of tasks in `Running` at once.
    pub max_concurrent_tasks: usize,

    /// Wall-clock deadline per task, measured from admission.
    pub task_timeout: Duration,

    /// Root under which each task gets its own directory.
    pub output_dir: PathBuf,

    pub analysis_policy: AnalysisPolicy,

    /// Keep the plain merged video when subtitle rendering fails.
    pub subtitle_fallback: bool,

    /// How long shutdown waits for running tasks before forcing them.
    pub shutdown_grace: Duration,

    /// Upper bound on tasks held in the Registry.
    pub max_tracked_tasks: usize,

    pub workspace_retention: WorkspaceRetention,

    /// Terminal tasks older than this are evicted by the sweeper.
    pub retention_window: Duration,

    /// Same-video clips closer than this (seconds) are merged.
    pub clip_adjacent_gap: f64,

    /// Seconds added to the end of every clip.
    pub clip_end_padding: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            task_timeout: Duration::from_secs(600),
            output_dir: PathBuf::from("output"),
            analysis_policy: AnalysisPolicy::DegradeToDefault,
            subtitle_fallback: true,
            shutdown_grace: Duration::from_secs(30),
            max_tracked_tasks: 1024,
            workspace_retention: WorkspaceRetention::Keep,
            retention_window: Duration::from_secs(7 * 24 * 3600),
            clip_adjacent_gap: 2.0,
            clip_end_padding: 1.0,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_secs = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            max_concurrent_tasks: lookup("MAX_CONCURRENT_TASKS")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_tasks),
            task_timeout: parse_secs("TASK_TIMEOUT", defaults.task_timeout),
            output_dir: lookup("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            analysis_policy: lookup("AI_FALLBACK_ON_ERROR")
                .and_then(|v| AnalysisPolicy::parse(&v))
                .unwrap_or(defaults.analysis_policy),
            subtitle_fallback: lookup("SUBTITLE_FALLBACK_ON_ERROR")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.subtitle_fallback),
            shutdown_grace: parse_secs("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace),
            max_tracked_tasks: lookup("MAX_TRACKED_TASKS")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_tracked_tasks),
            workspace_retention: lookup("WORKSPACE_RETENTION")
                .and_then(|v| WorkspaceRetention::parse(&v))
                .unwrap_or(defaults.workspace_retention),
            retention_window: parse_secs("RETENTION_WINDOW_SECS", defaults.retention_window),
            clip_adjacent_gap: lookup("CLIP_ADJACENT_GAP")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|g| *g >= 0.0)
                .unwrap_or(defaults.clip_adjacent_gap),
            clip_end_padding: lookup("CLIP_END_PADDING")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|p| *p >= 0.0)
                .unwrap_or(defaults.clip_end_padding),
        }
    }

    /// Builder method to set the concurrency ceiling.
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    /// Builder method to set the per-task deadline.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Builder method to set the workspace root.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the analysis failure policy.
    pub fn with_analysis_policy(mut self, policy: AnalysisPolicy) -> Self {
        self.analysis_policy = policy;
        self
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.task_timeout, Duration::from_secs(600));
        assert_eq!(config.analysis_policy, AnalysisPolicy::DegradeToDefault);
        assert_eq!(config.workspace_retention, WorkspaceRetention::Keep);
        assert!(config.subtitle_fallback);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("MAX_CONCURRENT_TASKS", "5"),
            ("TASK_TIMEOUT", "30"),
            ("OUTPUT_DIR", "/tmp/out"),
            ("AI_FALLBACK_ON_ERROR", "false"),
            ("SUBTITLE_FALLBACK_ON_ERROR", "no"),
            ("WORKSPACE_RETENTION", "purge-intermediates"),
            ("CLIP_ADJACENT_GAP", "0.5"),
        ]));
        assert_eq!(config.max_concurrent_tasks, 5);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.analysis_policy, AnalysisPolicy::Strict);
        assert!(!config.subtitle_fallback);
        assert_eq!(
            config.workspace_retention,
            WorkspaceRetention::PurgeIntermediates
        );
        assert_eq!(config.clip_adjacent_gap, 0.5);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("MAX_CONCURRENT_TASKS", "0"),
            ("TASK_TIMEOUT", "soon"),
            ("WORKSPACE_RETENTION", "forever"),
            ("CLIP_END_PADDING", "-1"),
        ]));
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.task_timeout, Duration::from_secs(600));
        assert_eq!(config.workspace_retention, WorkspaceRetention::Keep);
        assert_eq!(config.clip_end_padding, 1.0);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(AnalysisPolicy::parse("strict"), Some(AnalysisPolicy::Strict));
        assert_eq!(
            AnalysisPolicy::parse("Degrade"),
            Some(AnalysisPolicy::DegradeToDefault)
        );
        assert_eq!(AnalysisPolicy::parse("maybe"), None);
    }
}
