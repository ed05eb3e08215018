//! Per-frame unit of work: detection, region filtering, mask construction,
//! and inpainting backend invocation.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::{
    detect::TextDetector,
    inpaint::{InpaintBackend, Mask},
    region::{DetectedBox, RegionMatcher, RegionSet},
    Frame, RemovalError, RemovalResult,
};

/// Effective per-task pipeline tunables, merged from policy defaults and
/// submission overrides. Immutable for the task's lifetime.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mask_margin: u32,
    pub vertical_slack: Option<u32>,
    pub skip_detection: bool,
    pub detect_timeout: Duration,
    pub inpaint_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

/// Processes one task's frames sequentially. Detection and inpainting are
/// the only suspension points; matching and mask construction are cheap and
/// synchronous.
pub struct FramePipeline {
    matcher: RegionMatcher,
    detector: Arc<dyn TextDetector>,
    backend: Arc<dyn InpaintBackend>,
    settings: PipelineSettings,
}

impl FramePipeline {
    pub fn new(
        matcher: RegionMatcher,
        detector: Arc<dyn TextDetector>,
        backend: Arc<dyn InpaintBackend>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            matcher,
            detector,
            backend,
            settings,
        }
    }

    /// Runs one frame through the full pass. An empty mask is not an error:
    /// the frame is returned unmodified so content outside the allowed
    /// regions is never touched.
    #[instrument(skip_all, fields(frame = frame.metadata.frame_index))]
    pub async fn process_frame(&self, frame: &Frame, regions: &RegionSet) -> RemovalResult<Frame> {
        let mask = self.build_mask(frame, regions).await?;
        if mask.is_empty() {
            debug!(target = "pipeline", "empty mask, frame passes through");
            return Ok(frame.clone());
        }

        let backend = self.backend.clone();
        retry_bounded(
            "inpaint",
            self.settings.max_attempts,
            self.settings.retry_backoff,
            || {
                let backend = backend.clone();
                let mask = mask.clone();
                async move {
                    match timeout(self.settings.inpaint_timeout, backend.inpaint(frame, &mask))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RemovalError::Transient {
                            stage: "inpaint",
                            detail: format!(
                                "backend call exceeded {}ms",
                                self.settings.inpaint_timeout.as_millis()
                            ),
                        }),
                    }
                }
            },
        )
        .await
    }

    /// Runs detection for one frame with timeout and bounded retry. Also
    /// used by the scheduler to resolve regions during the detecting phase.
    pub async fn detect_boxes(&self, frame: &Frame) -> RemovalResult<Vec<DetectedBox>> {
        let detector = self.detector.clone();
        retry_bounded(
            "detect",
            self.settings.max_attempts,
            self.settings.retry_backoff,
            || {
                let detector = detector.clone();
                async move {
                    match timeout(self.settings.detect_timeout, detector.detect(frame)).await {
                        Ok(result) => result,
                        Err(_) => Err(RemovalError::Transient {
                            stage: "detect",
                            detail: format!(
                                "detection exceeded {}ms",
                                self.settings.detect_timeout.as_millis()
                            ),
                        }),
                    }
                }
            },
        )
        .await
    }

    async fn build_mask(&self, frame: &Frame, regions: &RegionSet) -> RemovalResult<Mask> {
        let width = frame.metadata.width;
        let height = frame.metadata.height;

        if self.settings.skip_detection {
            return Ok(Mask::from_regions(
                width,
                height,
                regions,
                self.settings.mask_margin,
            ));
        }

        let boxes = self.detect_boxes(frame).await?;
        let matched = self.filter_boxes(boxes, regions);
        Ok(Mask::from_boxes(
            width,
            height,
            &matched,
            self.settings.mask_margin,
        ))
    }

    /// Drops geometry-degenerate boxes, then keeps only boxes belonging to
    /// an allowed region. Non-matching detections are discarded, never
    /// widened into a fallback mask.
    fn filter_boxes(&self, boxes: Vec<DetectedBox>, regions: &RegionSet) -> Vec<DetectedBox> {
        boxes
            .into_iter()
            .filter(|boxed| {
                if let Some(slack) = self.settings.vertical_slack {
                    // A subtitle line is wider than tall; a markedly vertical
                    // box is a false detection.
                    if boxed.height() > boxed.width().saturating_add(slack) {
                        return false;
                    }
                }
                self.matcher.matches(regions, boxed)
            })
            .collect()
    }
}

/// Retries transient failures up to the attempt budget with linear backoff;
/// exhausting the budget escalates the last transient failure to fatal.
pub async fn retry_bounded<T, F, Fut>(
    stage: &'static str,
    max_attempts: u32,
    backoff: Duration,
    operation: F,
) -> RemovalResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = RemovalResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                warn!(target = "pipeline", stage, attempt, error = %err, "transient failure, retrying");
                tokio::time::sleep(backoff.saturating_mul(attempt)).await;
                attempt += 1;
            }
            Err(err) if err.is_transient() => {
                return Err(RemovalError::Fatal {
                    stage,
                    detail: format!("retry budget exhausted after {max_attempts} attempts: {err}"),
                });
            }
            Err(err) => return Err(err),
        }
    }
}
