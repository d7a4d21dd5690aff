//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use cliprun_core::TaskStatus;

use crate::registry::TaskRegistry;
use crate::scheduler::Scheduler;

/// Collect all metrics from the registry and scheduler as Prometheus text.
pub async fn collect_metrics(registry: &TaskRegistry, scheduler: &Scheduler) -> String {
    let mut output = String::new();

    collect_task_metrics(registry, &mut output).await;
    collect_scheduler_metrics(scheduler, &mut output);

    output
}

/// Collect task metrics by status.
async fn collect_task_metrics(registry: &TaskRegistry, output: &mut String) {
    let tasks = registry.list(None).await;

    let mut counts = [0u64; TaskStatus::ALL.len()];
    for task in &tasks {
        if let Some(idx) = TaskStatus::ALL.iter().position(|s| *s == task.status) {
            counts[idx] += 1;
        }
    }

    writeln!(
        output,
        "# HELP cliprun_tasks_total Number of tracked tasks by status"
    )
    .ok();
    writeln!(output, "# TYPE cliprun_tasks_total gauge").ok();
    for (status, count) in TaskStatus::ALL.iter().zip(counts) {
        writeln!(
            output,
            "cliprun_tasks_total{{status=\"{}\"}} {count}",
            status.as_str()
        )
        .ok();
    }
}

/// Collect admission metrics.
fn collect_scheduler_metrics(scheduler: &Scheduler, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP cliprun_queue_depth Tasks waiting for an execution slot"
    )
    .ok();
    writeln!(output, "# TYPE cliprun_queue_depth gauge").ok();
    writeln!(output, "cliprun_queue_depth {}", scheduler.queue_depth()).ok();

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP cliprun_running_slots Execution slots currently in use"
    )
    .ok();
    writeln!(output, "# TYPE cliprun_running_slots gauge").ok();
    writeln!(output, "cliprun_running_slots {}", scheduler.running_count()).ok();
}
