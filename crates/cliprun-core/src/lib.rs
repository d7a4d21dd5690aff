//! ClipRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Async runtimes
//! - Filesystem or subprocess I/O
//! - Network clients
//!
//! All types here describe one highlight-clip pipeline job and the text
//! formats that flow between its stages.

pub mod clip;
pub mod error;
pub mod event;
pub mod ids;
pub mod input;
pub mod stage;
pub mod status;
pub mod task;
pub mod timecode;
pub mod transcript;

// Re-export commonly used types
pub use clip::ClipInstruction;
pub use error::{CoreError, StageError};
pub use event::{ProgressEvent, ProgressKind};
pub use ids::TaskId;
pub use input::VideoInput;
pub use stage::Stage;
pub use status::TaskStatus;
pub use task::{SkippedInput, Task, TaskError, TaskOptions, TaskResult};
pub use transcript::{MergedTranscript, Sentence, Transcript};
