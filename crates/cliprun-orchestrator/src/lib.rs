//! ClipRun Orchestrator Library
//!
//! This crate provides the task orchestration core for ClipRun: the task
//! registry, admission control, the pipeline runner, progress fan-out, and
//! the `ClipService` facade a front end drives.

pub mod config;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod registry;
pub mod retention;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod stages;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use config::{AnalysisPolicy, Config, WorkspaceRetention};
pub use error::{OrchestratorError, Result, SubmissionError};
pub use progress::{ProgressHub, ProgressStream};
pub use registry::TaskRegistry;
pub use scheduler::{CancelAck, Scheduler};
pub use service::ClipService;
pub use stages::{
    Analysis, Analyzer, AudioExtractor, ClipCutter, Collaborators, CutClip, CutOutput,
    RemoteObject, StageContext, SubtitleRenderer, TextTranscriptMerger, Transcriber,
    TranscriptMerger, Uploader, VideoMerger,
};
pub use workspace::Workspace;
