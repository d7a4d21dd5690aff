//! ClipRun CLI - turn long videos into a highlight reel from the terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cliprun_core::input::{assign_unique_names, is_supported_video};
use cliprun_core::{ProgressEvent, ProgressKind, Task, TaskId, TaskOptions, TaskStatus, VideoInput};
use cliprun_media::{build_collaborators, MediaConfig};
use cliprun_orchestrator::{AnalysisPolicy, ClipService, Config, OrchestratorError, ProgressStream};

/// ClipRun CLI - highlight pipeline runner
#[derive(Parser, Debug)]
#[command(name = "cliprun")]
#[command(about = "Cut highlight reels out of long videos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the highlight pipeline
    Run(RunArgs),

    /// List the video files a directory would contribute
    Scan {
        /// Directory to scan
        dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Video files to process
    files: Vec<PathBuf>,

    /// Also take every supported video in this directory
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Extra instructions for clip selection
    #[arg(short, long)]
    prompt: Option<String>,

    /// Burn subtitles into the final video
    #[arg(long)]
    captions: bool,

    /// Run one task per video instead of one task for all of them
    #[arg(long)]
    separate: bool,

    /// Maximum tasks running at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-task wall-clock limit in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Root directory for task workspaces
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// What to do when analysis fails
    #[arg(long, value_enum)]
    analysis_policy: Option<PolicyArg>,

    /// Print progress events as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    Strict,
    Degrade,
}

impl From<PolicyArg> for AnalysisPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Strict => AnalysisPolicy::Strict,
            PolicyArg::Degrade => AnalysisPolicy::DegradeToDefault,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Scan { dir } => {
            for path in scan_dir(&dir)? {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = apply_overrides(Config::from_env(), &args);
    let media = MediaConfig::from_env();

    let mut paths = args.files.clone();
    if let Some(dir) = &args.input_dir {
        paths.extend(scan_dir(dir)?);
    }
    if paths.is_empty() {
        return Err("no input videos given".into());
    }
    let inputs = assign_unique_names(paths);

    let mut options = TaskOptions::default().with_captions(args.captions);
    if let Some(prompt) = &args.prompt {
        options = options.with_prompt(prompt.clone());
    }

    info!(
        inputs = inputs.len(),
        concurrency = config.max_concurrent_tasks,
        output = %config.output_dir.display(),
        "Starting ClipRun"
    );

    let service = Arc::new(ClipService::new(config, build_collaborators(&media)?));

    let mut task_ids = Vec::new();
    for (task_id, mut stream) in submit_batches(&service, batches(inputs, args.separate), &options).await? {
        let json = args.json;
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "Failed to encode event"),
                    }
                } else {
                    println!("{}", describe_event(&event));
                }
            }
        });
        task_ids.push(task_id);
    }

    let waiter = {
        let service = service.clone();
        let task_ids = task_ids.clone();
        async move {
            let mut finished = Vec::new();
            for id in &task_ids {
                finished.push(service.wait_for_terminal(id).await);
            }
            finished
        }
    };

    let finished = tokio::select! {
        finished = waiter => finished,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling tasks");
            for id in &task_ids {
                if let Err(e) = service.cancel_task(id).await {
                    warn!(task_id = %id, error = %e, "Cancel failed");
                }
            }
            service.shutdown().await;
            return Err("interrupted".into());
        }
    };
    service.shutdown().await;

    let mut incomplete = 0;
    for task in finished {
        let task = task?;
        println!("{}", summarize(&task));
        if task.status != TaskStatus::Completed {
            incomplete += 1;
        }
    }
    if incomplete > 0 {
        return Err(format!("{incomplete} task(s) did not complete").into());
    }
    Ok(())
}

/// Submit every batch and subscribe to its progress.
///
/// On the first failure the service is shut down before the error is
/// returned, so tasks already handed to the scheduler are drained.
async fn submit_batches(
    service: &ClipService,
    batches: Vec<Vec<VideoInput>>,
    options: &TaskOptions,
) -> Result<Vec<(TaskId, ProgressStream)>, OrchestratorError> {
    let mut submitted = Vec::new();
    for batch in batches {
        let result = match service.submit_task(batch, options.clone()).await {
            Ok(task_id) => service.subscribe_progress(&task_id).await.map(|s| (task_id, s)),
            Err(e) => Err(e),
        };
        match result {
            Ok(entry) => submitted.push(entry),
            Err(e) => {
                warn!(error = %e, submitted = submitted.len(), "Submission failed, stopping");
                service.shutdown().await;
                return Err(e);
            }
        }
    }
    Ok(submitted)
}

fn apply_overrides(mut config: Config, args: &RunArgs) -> Config {
    if let Some(n) = args.concurrency {
        config = config.with_max_concurrent_tasks(n);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_task_timeout(Duration::from_secs(secs));
    }
    if let Some(dir) = &args.output {
        config = config.with_output_dir(dir.clone());
    }
    if let Some(policy) = args.analysis_policy {
        config = config.with_analysis_policy(policy.into());
    }
    config
}

/// Supported videos directly inside `dir`, sorted by path.
fn scan_dir(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_supported_video(p))
        .collect();
    paths.sort();
    Ok(paths)
}

/// One batch for everything, or one batch per input when `separate`.
fn batches(inputs: Vec<VideoInput>, separate: bool) -> Vec<Vec<VideoInput>> {
    if separate {
        inputs.into_iter().map(|i| vec![i]).collect()
    } else {
        vec![inputs]
    }
}

fn describe_event(event: &ProgressEvent) -> String {
    let what = match &event.kind {
        ProgressKind::Started { workspace } => format!("started in {}", workspace.display()),
        ProgressKind::StageStarted { stage, input } => match input {
            Some(input) => format!("{stage} {input} ..."),
            None => format!("{stage} ..."),
        },
        ProgressKind::StageCompleted { stage, input } => match input {
            Some(input) => format!("{stage} {input} done"),
            None => format!("{stage} done"),
        },
        ProgressKind::InputSkipped { input, stage, reason } => {
            format!("skipped {input} at {stage}: {reason}")
        }
        ProgressKind::AnalysisDegraded { reason } => {
            format!("analysis failed, using default selection: {reason}")
        }
        ProgressKind::SubtitlesSkipped { reason } => format!("subtitles skipped: {reason}"),
        ProgressKind::Terminal { status, .. } => format!("finished: {status}"),
    };
    format!("[{}] {what}", event.task_id)
}

fn summarize(task: &Task) -> String {
    format!("{}  {}", task.id, task.summary())
}
