//! Task scheduler owning the bounded worker pool and all task bookkeeping.

pub mod admission;
pub mod stats;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::SystemTime,
};

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::{
    config::AppConfig,
    detect::TextDetector,
    inpaint::{Algorithm, BackendSet},
    media::{FrameSink, FrameSource},
    pipeline::{FramePipeline, PipelineSettings},
    region::{Region, RegionMatcher, RegionSet},
    task::{Task, TaskId, TaskState, TaskView},
    Frame, RemovalError, RemovalResult,
};

pub use stats::SchedulerStats;

/// Per-job overrides of the policy defaults, fixed at submission.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub mask_margin: Option<u32>,
    pub min_overlap: Option<f32>,
    /// Bypass per-frame detection and consume the region set as the mask.
    /// Only valid for backends that accept a region mask.
    pub skip_detection: bool,
    pub detect_timeout_ms: Option<u64>,
    pub inpaint_timeout_ms: Option<u64>,
}

/// Submission payload handed to [`TaskScheduler::submit`].
pub struct Job {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
    /// Allowed subtitle regions in the external `[x1, y1, x2, y2]` corner
    /// form; empty means no filter.
    pub regions: Vec<[i64; 4]>,
    pub algorithm: Algorithm,
    pub auto_detect: bool,
    pub overrides: JobOverrides,
}

struct TaskEntry {
    task: Task,
    cancel: Arc<AtomicBool>,
}

struct SchedulerInner {
    config: AppConfig,
    detector: Arc<dyn TextDetector>,
    backends: BackendSet,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    slots: Arc<Semaphore>,
}

impl SchedulerInner {
    fn with_task<R>(
        &self,
        id: &TaskId,
        apply: impl FnOnce(&mut Task) -> R,
    ) -> RemovalResult<R> {
        let mut tasks = self.tasks.lock().expect("task map mutex poisoned");
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| RemovalError::Validation(format!("unknown task {id}")))?;
        Ok(apply(&mut entry.task))
    }

    fn mark_failed(&self, id: &TaskId, error: &RemovalError) {
        let result = self.with_task(id, |task| task.fail(error));
        match result {
            Ok(Ok(())) => warn!(target = "scheduler", task = %id, error = %error, "task failed"),
            Ok(Err(transition)) => {
                warn!(target = "scheduler", task = %id, error = %transition, "failure after terminal state")
            }
            Err(missing) => warn!(target = "scheduler", task = %id, error = %missing, "failure for evicted task"),
        }
    }

    fn mark_cancelled(&self, id: &TaskId) {
        let result = self.with_task(id, |task| task.cancel());
        if let Ok(Ok(())) = result {
            info!(target = "scheduler", task = %id, "task cancelled");
        }
    }

    fn settings_for(&self, overrides: &JobOverrides) -> PipelineSettings {
        let workers = &self.config.workers;
        let matcher = &self.config.matcher;
        PipelineSettings {
            mask_margin: overrides.mask_margin.unwrap_or(matcher.mask_margin_px),
            vertical_slack: matcher.vertical_slack_px,
            skip_detection: overrides.skip_detection,
            detect_timeout: overrides
                .detect_timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| workers.detect_timeout()),
            inpaint_timeout: overrides
                .inpaint_timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| workers.inpaint_timeout()),
            max_attempts: workers.max_attempts,
            retry_backoff: workers.retry_backoff(),
        }
    }

    fn matcher_for(&self, overrides: &JobOverrides) -> RegionMatcher {
        RegionMatcher::new(
            overrides
                .min_overlap
                .unwrap_or(self.config.matcher.min_overlap),
        )
    }
}

/// Bounded-concurrency scheduler driving each task's frames through the
/// per-frame pipeline.
///
/// The task map is the only structure shared across threads; each task is
/// mutated exclusively by its owning worker while non-terminal (single
/// writer). Cancellation requests only set a flag observed by that worker
/// at frame boundaries.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(config: AppConfig, detector: Arc<dyn TextDetector>, backends: BackendSet) -> Self {
        let ceiling = config.workers.max_concurrent_tasks.max(1) as usize;
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                detector,
                backends,
                tasks: Mutex::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(ceiling)),
            }),
        }
    }

    /// Number of tasks currently holding a worker slot.
    pub fn active_tasks(&self) -> usize {
        self.inner.config.workers.max_concurrent_tasks as usize
            - self.inner.slots.available_permits()
    }

    /// Validates and admits a job. Submissions beyond the worker ceiling
    /// queue in `Pending` (FIFO) rather than being rejected; malformed
    /// input is rejected here and no task is created.
    #[instrument(skip_all, fields(algorithm = %job.algorithm))]
    pub fn submit(&self, job: Job) -> RemovalResult<TaskId> {
        let regions = RegionSet::from_corner_list(&job.regions)?;
        let backend = self.inner.backends.get(job.algorithm)?;
        if let Some(min_overlap) = job.overrides.min_overlap {
            if !(0.0..=1.0).contains(&min_overlap) {
                return Err(RemovalError::Validation(format!(
                    "min_overlap {min_overlap} outside [0, 1]"
                )));
            }
        }
        if job.overrides.skip_detection {
            if !job.algorithm.accepts_region_mask() {
                return Err(RemovalError::Validation(format!(
                    "algorithm {} requires per-frame detection",
                    job.algorithm
                )));
            }
            if regions.is_empty() && !job.auto_detect {
                return Err(RemovalError::Validation(
                    "skip-detection submissions need explicit regions or auto-detect".to_string(),
                ));
            }
        }

        let id = TaskId::generate();
        let cancel = Arc::new(AtomicBool::new(false));
        let task = Task::new(id.clone(), job.algorithm, regions.clone(), job.auto_detect);
        self.inner
            .tasks
            .lock()
            .expect("task map mutex poisoned")
            .insert(
                id.clone(),
                TaskEntry {
                    task,
                    cancel: cancel.clone(),
                },
            );
        info!(target = "scheduler", task = %id, regions = regions.len(), "task admitted");

        let worker = Worker {
            inner: self.inner.clone(),
            id: id.clone(),
            cancel,
            regions,
            auto_detect: job.auto_detect,
            pipeline: FramePipeline::new(
                self.inner.matcher_for(&job.overrides),
                self.inner.detector.clone(),
                backend,
                self.inner.settings_for(&job.overrides),
            ),
        };
        spawn_supervised(worker, job.source, job.sink);
        Ok(id)
    }

    /// Requests cooperative cancellation and returns immediately. The
    /// owning worker observes the flag at the next frame boundary; callers
    /// poll [`TaskScheduler::status`] for the eventual transition.
    pub fn cancel(&self, id: &TaskId) -> RemovalResult<()> {
        let tasks = self.inner.tasks.lock().expect("task map mutex poisoned");
        let entry = tasks
            .get(id)
            .ok_or_else(|| RemovalError::Validation(format!("unknown task {id}")))?;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn status(&self, id: &TaskId) -> RemovalResult<TaskView> {
        self.inner.with_task(id, |task| task.view())
    }

    /// Removes a terminal task's bookkeeping. Evicting a non-terminal task
    /// is rejected.
    pub fn evict(&self, id: &TaskId) -> RemovalResult<()> {
        let mut tasks = self.inner.tasks.lock().expect("task map mutex poisoned");
        let entry = tasks
            .get(id)
            .ok_or_else(|| RemovalError::Validation(format!("unknown task {id}")))?;
        if !entry.task.is_terminal() {
            return Err(RemovalError::Validation(format!(
                "cannot evict task {id} in state {}",
                entry.task.state()
            )));
        }
        tasks.remove(id);
        Ok(())
    }

    /// Task views, optionally filtered by state, newest first.
    pub fn list(&self, state: Option<TaskState>) -> Vec<TaskView> {
        let tasks = self.inner.tasks.lock().expect("task map mutex poisoned");
        let mut views: Vec<TaskView> = tasks
            .values()
            .filter(|entry| state.map_or(true, |s| entry.task.state() == s))
            .map(|entry| entry.task.view())
            .collect();
        views.sort_by(|a, b| b.created_at_epoch_secs.cmp(&a.created_at_epoch_secs));
        views
    }

    pub fn statistics(&self) -> SchedulerStats {
        let tasks = self.inner.tasks.lock().expect("task map mutex poisoned");
        stats::collect(tasks.values().map(|entry| &entry.task))
    }

    /// Evicts terminal tasks whose retention window has elapsed; returns
    /// the number removed.
    pub fn sweep_expired(&self) -> usize {
        let retention = self.inner.config.workers.retention();
        let now = SystemTime::now();
        let mut tasks = self.inner.tasks.lock().expect("task map mutex poisoned");
        let before = tasks.len();
        tasks.retain(|_, entry| {
            if !entry.task.is_terminal() {
                return true;
            }
            match entry.task.finished_at() {
                Some(finished) => match now.duration_since(finished) {
                    Ok(age) => age < retention,
                    Err(_) => true,
                },
                None => true,
            }
        });
        before - tasks.len()
    }
}

/// Everything the owning worker needs to drive one task to a terminal
/// state.
struct Worker {
    inner: Arc<SchedulerInner>,
    id: TaskId,
    cancel: Arc<AtomicBool>,
    regions: RegionSet,
    auto_detect: bool,
    pipeline: FramePipeline,
}

/// Spawns the worker under a supervisor so a panicking worker still lands
/// the task in `Failed` and releases its slot.
fn spawn_supervised(worker: Worker, source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) {
    let inner = worker.inner.clone();
    let id = worker.id.clone();
    tokio::spawn(async move {
        let handle = tokio::spawn(run_task(worker, source, sink));
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(RemovalError::Cancelled)) => inner.mark_cancelled(&id),
            Ok(Err(error)) => inner.mark_failed(&id, &error),
            Err(join_error) => inner.mark_failed(&id, &RemovalError::from(join_error)),
        }
    });
}

#[instrument(skip_all, fields(task = %worker.id))]
async fn run_task(
    worker: Worker,
    mut source: Box<dyn FrameSource>,
    mut sink: Box<dyn FrameSink>,
) -> RemovalResult<()> {
    let inner = &worker.inner;
    let id = &worker.id;

    // Honor cancellations issued while the task is still queued.
    if worker.cancel.load(Ordering::SeqCst) {
        return Err(RemovalError::Cancelled);
    }

    // The permit is the worker slot; dropping it on any exit path (including
    // panic unwind of this future) releases capacity.
    let _permit = inner
        .slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| RemovalError::Fatal {
            stage: "scheduler",
            detail: "worker pool closed".to_string(),
        })?;

    if worker.cancel.load(Ordering::SeqCst) {
        return Err(RemovalError::Cancelled);
    }

    let frames_total = source.frame_count_hint();
    let mut regions = worker.regions.clone();
    let mut carried_frame: Option<Frame> = None;

    if worker.auto_detect {
        inner.with_task(id, |task| task.begin_detecting())??;
        if let Some(frame) = source.next_frame().await? {
            admit_frame(inner, &frame)?;
            let boxes = worker.pipeline.detect_boxes(&frame).await?;
            let resolved = regions_from_boxes(&boxes);
            info!(
                target = "scheduler",
                task = %id,
                detections = boxes.len(),
                resolved = resolved.len(),
                "whole-media detection resolved regions"
            );
            inner.with_task(id, |task| task.resolve_regions(resolved.clone()))??;
            regions = resolved;
            carried_frame = Some(frame);
        }
    }

    inner.with_task(id, |task| task.begin_processing(frames_total))??;

    let mut frames_done = 0u64;
    loop {
        let frame = match carried_frame.take() {
            Some(frame) => Some(frame),
            None => source.next_frame().await?,
        };
        let Some(frame) = frame else { break };

        // Cooperative cancellation checkpoint; never aborts mid-frame.
        if worker.cancel.load(Ordering::SeqCst) {
            return Err(RemovalError::Cancelled);
        }

        admit_frame(inner, &frame)?;
        let processed = worker.pipeline.process_frame(&frame, &regions).await?;
        sink.write_frame(processed).await?;
        frames_done += 1;
        inner.with_task(id, |task| task.record_progress(frames_done))?;
    }

    let output = sink.finalize().await?;
    inner.with_task(id, |task| task.complete(output))??;
    info!(target = "scheduler", task = %id, frames = frames_done, "task completed");
    Ok(())
}

fn admit_frame(inner: &SchedulerInner, frame: &Frame) -> RemovalResult<()> {
    frame.metadata.validate(&inner.config.limits)?;
    admission::admit(&inner.config.limits, &frame.metadata)
}

/// Converts whole-media detections into the task's resolved region set.
/// Degenerate boxes are skipped; no detections leaves the set empty, which
/// keeps the legacy accept-all behavior for per-frame detection.
fn regions_from_boxes(boxes: &[crate::region::DetectedBox]) -> RegionSet {
    let regions = boxes
        .iter()
        .filter_map(|boxed| Region::new(boxed.y_min, boxed.y_max, boxed.x_min, boxed.x_max).ok())
        .collect();
    RegionSet::new(regions)
}
