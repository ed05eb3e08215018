//! Task lifecycle modelling: states, transition rules, and progress.

use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::{inpaint::Algorithm, region::RegionSet, RemovalError, RemovalResult};

/// Opaque caller-unguessable task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a random 128-bit hex token.
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Detecting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Detecting => "detecting",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Legal edges of the transition graph. States only move forward;
    /// `Failed` and `Cancelled` are reachable from any non-terminal state.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskState::Pending => false,
            TaskState::Detecting => self == TaskState::Pending,
            TaskState::Processing => {
                matches!(self, TaskState::Pending | TaskState::Detecting)
            }
            TaskState::Completed => self == TaskState::Processing,
            TaskState::Failed | TaskState::Cancelled => true,
        }
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified error detail recorded on a failed task. Immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub detail: String,
}

/// One end-to-end processing job owned by the scheduler.
///
/// Only the worker executing the task mutates it; cancellation requests go
/// through a separate flag observed by that worker at frame boundaries.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    state: TaskState,
    pub algorithm: Algorithm,
    pub regions: RegionSet,
    pub auto_detect: bool,
    frames_done: u64,
    frames_total: u64,
    error: Option<ErrorDetail>,
    output: Option<String>,
    pub created_at: SystemTime,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
}

impl Task {
    pub fn new(id: TaskId, algorithm: Algorithm, regions: RegionSet, auto_detect: bool) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            algorithm,
            regions,
            auto_detect,
            frames_done: 0,
            frames_total: 0,
            error: None,
            output: None,
            created_at: SystemTime::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Regions resolved during the detecting phase replace the empty set
    /// attached at submission; an explicit set is immutable afterwards.
    pub fn resolve_regions(&mut self, regions: RegionSet) -> RemovalResult<()> {
        if self.state != TaskState::Detecting {
            return Err(internal_transition_error(self.state, "resolve regions"));
        }
        self.regions = regions;
        Ok(())
    }

    fn transition(&mut self, next: TaskState) -> RemovalResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(internal_transition_error(self.state, next.as_str()));
        }
        if self.started_at.is_none()
            && matches!(next, TaskState::Detecting | TaskState::Processing)
        {
            self.started_at = Some(SystemTime::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(SystemTime::now());
        }
        self.state = next;
        Ok(())
    }

    pub fn begin_detecting(&mut self) -> RemovalResult<()> {
        self.transition(TaskState::Detecting)
    }

    pub fn begin_processing(&mut self, frames_total: u64) -> RemovalResult<()> {
        self.transition(TaskState::Processing)?;
        self.frames_total = frames_total;
        Ok(())
    }

    pub fn complete(&mut self, output: String) -> RemovalResult<()> {
        self.transition(TaskState::Completed)?;
        self.output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, error: &RemovalError) -> RemovalResult<()> {
        self.transition(TaskState::Failed)?;
        if self.error.is_none() {
            self.error = Some(ErrorDetail {
                kind: error.kind().to_string(),
                detail: error.to_string(),
            });
        }
        Ok(())
    }

    pub fn cancel(&mut self) -> RemovalResult<()> {
        self.transition(TaskState::Cancelled)
    }

    /// Monotonic progress update; regressions and post-terminal updates are
    /// ignored.
    pub fn record_progress(&mut self, frames_done: u64) {
        if !self.state.is_terminal() && frames_done > self.frames_done {
            self.frames_done = frames_done;
        }
    }

    pub fn progress_percent(&self) -> f32 {
        if self.state == TaskState::Completed {
            return 100.0;
        }
        if self.frames_total == 0 {
            return 0.0;
        }
        (self.frames_done as f32 / self.frames_total as f32 * 100.0).min(100.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        self.finished_at
    }

    /// Snapshot exposed on the status surface.
    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id.clone(),
            state: self.state,
            algorithm: self.algorithm,
            progress_percent: self.progress_percent(),
            frames_done: self.frames_done,
            frames_total: self.frames_total,
            error: self.error.clone(),
            output_ref: self.output.clone(),
            created_at_epoch_secs: epoch_secs(self.created_at),
            started_at_epoch_secs: self.started_at.map(epoch_secs),
            finished_at_epoch_secs: self.finished_at.map(epoch_secs),
        }
    }
}

/// Read-only task snapshot consumed by external API layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub state: TaskState,
    pub algorithm: Algorithm,
    pub progress_percent: f32,
    pub frames_done: u64,
    pub frames_total: u64,
    pub error: Option<ErrorDetail>,
    pub output_ref: Option<String>,
    pub created_at_epoch_secs: u64,
    pub started_at_epoch_secs: Option<u64>,
    pub finished_at_epoch_secs: Option<u64>,
}

fn epoch_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn internal_transition_error(from: TaskState, attempted: &str) -> RemovalError {
    RemovalError::Fatal {
        stage: "task",
        detail: format!("illegal transition from {from} to {attempted}"),
    }
}
