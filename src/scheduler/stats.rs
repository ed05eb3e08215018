//! Aggregate task statistics for the diagnostics surface.

use std::collections::HashMap;

use serde::Serialize;

use crate::task::{Task, TaskState};

/// Snapshot of scheduler bookkeeping suitable for assertions and reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total: u64,
    pub pending: u64,
    pub detecting: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Per-algorithm counts, sorted by algorithm name.
    pub by_algorithm: Vec<(String, u64)>,
}

pub(crate) fn collect<'a>(tasks: impl Iterator<Item = &'a Task>) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    let mut by_algorithm: HashMap<&'static str, u64> = HashMap::new();
    for task in tasks {
        stats.total += 1;
        match task.state() {
            TaskState::Pending => stats.pending += 1,
            TaskState::Detecting => stats.detecting += 1,
            TaskState::Processing => stats.processing += 1,
            TaskState::Completed => stats.completed += 1,
            TaskState::Failed => stats.failed += 1,
            TaskState::Cancelled => stats.cancelled += 1,
        }
        *by_algorithm.entry(task.algorithm.as_str()).or_insert(0) += 1;
    }
    stats.by_algorithm = by_algorithm
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    stats.by_algorithm.sort_by(|a, b| a.0.cmp(&b.0));
    stats
}
