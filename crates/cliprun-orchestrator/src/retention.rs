//! Eviction of finished tasks and cleanup of their workspaces.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cliprun_core::{Task, TaskId};

use crate::config::{Config, WorkspaceRetention};
use crate::error::Result;
use crate::registry::TaskRegistry;
use crate::workspace::Workspace;

/// Apply `policy` to the workspace of a finished task.
pub async fn apply_policy(policy: WorkspaceRetention, task: &Task) -> io::Result<()> {
    let Some(root) = &task.workspace else {
        return Ok(());
    };
    let workspace = Workspace::open(root);
    match policy {
        WorkspaceRetention::Keep => Ok(()),
        WorkspaceRetention::PurgeIntermediates => workspace.purge_intermediates().await,
        WorkspaceRetention::Purge => workspace.purge().await,
    }
}

/// Remove a terminal task from the registry and clean up its workspace.
///
/// A cleanup failure is logged; the task stays evicted.
pub async fn evict_task(registry: &TaskRegistry, config: &Config, id: &TaskId) -> Result<Task> {
    let task = registry.evict(id).await?;
    if let Err(e) = apply_policy(config.workspace_retention, &task).await {
        warn!(task_id = %id, error = %e, "Workspace cleanup failed");
    }
    info!(
        task_id = %id,
        status = %task.status,
        retention = ?config.workspace_retention,
        "Task released"
    );
    Ok(task)
}

/// Evict every terminal task that finished more than `retention_window`
/// before `now`. Returns the number of evicted tasks.
pub async fn sweep(registry: &TaskRegistry, config: &Config, now: DateTime<Utc>) -> usize {
    let Ok(window) = chrono::Duration::from_std(config.retention_window) else {
        return 0;
    };
    let expired = registry.finished_before(now - window).await;

    let mut evicted = 0;
    for id in expired {
        match evict_task(registry, config, &id).await {
            Ok(_) => evicted += 1,
            // Released by the caller between listing and eviction.
            Err(e) => debug!(task_id = %id, error = %e, "Skipping sweep of task"),
        }
    }
    evicted
}

/// Sweep every `period` until `shutdown` is cancelled.
pub async fn run_sweeper(
    registry: Arc<TaskRegistry>,
    config: Arc<Config>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval_timer = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            _ = shutdown.cancelled() => break,
        }

        let evicted = sweep(&registry, &config, Utc::now()).await;
        if evicted > 0 {
            info!(evicted, "Retention sweep evicted finished tasks");
        }
    }
    debug!("Retention sweeper stopped");
}
