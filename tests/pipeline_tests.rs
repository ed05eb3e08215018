use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use subscrub::{
    detect::{ScriptedDetector, TextDetector},
    inpaint::{Algorithm, InpaintBackend, Mask},
    pipeline::{FramePipeline, PipelineSettings},
    region::{DetectedBox, RegionMatcher, RegionSet},
    Frame, RemovalError, RemovalResult,
};

fn settings() -> PipelineSettings {
    PipelineSettings {
        mask_margin: 8,
        vertical_slack: Some(10),
        skip_detection: false,
        detect_timeout: Duration::from_secs(1),
        inpaint_timeout: Duration::from_secs(1),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(5),
    }
}

fn stacked_regions() -> RegionSet {
    RegionSet::from_corner_list(&[
        [108, 96, 972, 249],
        [108, 384, 972, 537],
        [108, 1632, 972, 1785],
        [108, 1785, 972, 1938],
    ])
    .expect("fixture regions")
}

fn boxed(y_min: u32, y_max: u32, x_min: u32, x_max: u32) -> DetectedBox {
    DetectedBox {
        y_min,
        y_max,
        x_min,
        x_max,
        text: "subtitle".to_string(),
        confidence: 0.9,
    }
}

fn tall_frame() -> Frame {
    Frame::from_bytes(vec![7; 1080 * 2000 * 3], 1080, 2000, 3, 0, 0)
}

fn mask_at(mask: &Mask, x: u32, y: u32) -> bool {
    mask.data()[y as usize * mask.width() as usize + x as usize] != 0
}

/// Backend recording every mask it is asked to inpaint.
struct RecordingBackend {
    masks: Arc<Mutex<Vec<Mask>>>,
    calls: Arc<AtomicU32>,
}

impl RecordingBackend {
    fn new() -> Self {
        Self {
            masks: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl InpaintBackend for RecordingBackend {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Sttn
    }

    async fn inpaint(&self, frame: &Frame, mask: &Mask) -> RemovalResult<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.masks
            .lock()
            .expect("mask log mutex poisoned")
            .push(mask.clone());
        Ok(frame.clone())
    }
}

/// Backend failing every call with the given error.
struct FailingBackend {
    error: RemovalError,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl InpaintBackend for FailingBackend {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Sttn
    }

    async fn inpaint(&self, _frame: &Frame, _mask: &Mask) -> RemovalResult<Frame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Detector failing transiently a fixed number of times before succeeding.
struct FlakyDetector {
    failures_left: AtomicU32,
    attempts: Arc<AtomicU32>,
    boxes: Vec<DetectedBox>,
}

#[async_trait]
impl TextDetector for FlakyDetector {
    async fn detect(&self, _frame: &Frame) -> RemovalResult<Vec<DetectedBox>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(RemovalError::Transient {
                stage: "detect",
                detail: "injected transient failure".to_string(),
            });
        }
        Ok(self.boxes.clone())
    }
}

/// Detector that stalls longer than any configured timeout.
struct StallingDetector;

#[async_trait]
impl TextDetector for StallingDetector {
    async fn detect(&self, _frame: &Frame) -> RemovalResult<Vec<DetectedBox>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn mask_contains_exactly_the_in_region_boxes() {
    let backend = Arc::new(RecordingBackend::new());
    let masks = backend.masks.clone();

    // Two boxes inside regions, two in the gaps between them.
    let in_first = boxed(100, 200, 200, 800);
    let in_third = boxed(1650, 1750, 200, 800);
    let in_gap_low = boxed(280, 350, 200, 800);
    let in_gap_mid = boxed(900, 1000, 200, 800);
    let detector = ScriptedDetector::with_boxes(vec![
        in_first.clone(),
        in_gap_low,
        in_third.clone(),
        in_gap_mid,
    ]);

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        backend,
        settings(),
    );
    pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect("frame processed");

    let masks = masks.lock().expect("mask log mutex poisoned");
    assert_eq!(masks.len(), 1);
    let mask = &masks[0];

    // Surviving boxes are painted (dilated by the 8px margin)...
    assert!(mask_at(mask, 500, 150));
    assert!(mask_at(mask, 500, 1700));
    assert!(mask_at(mask, 192, 95));
    // ...the gaps are not.
    assert!(!mask_at(mask, 500, 315));
    assert!(!mask_at(mask, 500, 950));

    // Exactly the two dilated 100x600 boxes are painted.
    let dilated_box: u64 = (100 + 16) * (600 + 16);
    assert_eq!(mask.painted_pixels(), 2 * dilated_box);
}

#[tokio::test]
async fn frame_passes_through_when_no_box_matches() {
    let backend = Arc::new(RecordingBackend::new());
    let calls = backend.calls.clone();
    let detector = ScriptedDetector::with_boxes(vec![boxed(900, 1000, 200, 800)]);

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        backend,
        settings(),
    );
    let frame = tall_frame();
    let processed = pipeline
        .process_frame(&frame, &stacked_regions())
        .await
        .expect("empty mask is not an error");

    assert_eq!(processed, frame);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_detection_failures_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let detector = FlakyDetector {
        failures_left: AtomicU32::new(2),
        attempts: attempts.clone(),
        boxes: vec![boxed(100, 200, 200, 800)],
    };
    let backend = Arc::new(RecordingBackend::new());
    let calls = backend.calls.clone();

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        backend,
        settings(),
    );
    pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect("third attempt succeeds");

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_retries_escalate_to_fatal() {
    let attempts = Arc::new(AtomicU32::new(0));
    let detector = FlakyDetector {
        failures_left: AtomicU32::new(u32::MAX),
        attempts: attempts.clone(),
        boxes: Vec::new(),
    };

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        Arc::new(RecordingBackend::new()),
        settings(),
    );
    let err = pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect_err("retry budget must run out");

    assert_eq!(err.kind(), "fatal");
    assert!(err.to_string().contains("retry budget exhausted"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn fatal_backend_failure_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let backend = FailingBackend {
        error: RemovalError::Fatal {
            stage: "inpaint",
            detail: "corrupt weights".to_string(),
        },
        calls: calls.clone(),
    };
    let detector = ScriptedDetector::with_boxes(vec![boxed(100, 200, 200, 800)]);

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        Arc::new(backend),
        settings(),
    );
    let err = pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect_err("fatal failure propagates");

    assert_eq!(err.kind(), "fatal");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skip_detection_rasterizes_the_region_set() {
    let backend = Arc::new(RecordingBackend::new());
    let masks = backend.masks.clone();
    // Any detector call would report an empty frame; skip mode must not ask.
    let detector = ScriptedDetector::default();

    let mut skip_settings = settings();
    skip_settings.skip_detection = true;
    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        backend,
        skip_settings,
    );
    let regions = RegionSet::from_corner_list(&[[108, 96, 972, 249]]).expect("region");
    pipeline
        .process_frame(&tall_frame(), &regions)
        .await
        .expect("region mask path");

    let masks = masks.lock().expect("mask log mutex poisoned");
    assert_eq!(masks.len(), 1);
    assert!(mask_at(&masks[0], 500, 150));
    assert!(!mask_at(&masks[0], 500, 500));
    // Region 153x864 dilated by the 8px margin on every side.
    let dilated_region: u64 = (153 + 16) * (864 + 16);
    assert_eq!(masks[0].painted_pixels(), dilated_region);
}

#[tokio::test]
async fn detection_timeout_fails_the_frame_as_classified_error() {
    let mut fast_timeout = settings();
    fast_timeout.detect_timeout = Duration::from_millis(20);
    fast_timeout.max_attempts = 1;

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(StallingDetector),
        Arc::new(RecordingBackend::new()),
        fast_timeout,
    );
    let err = pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect_err("stalled detection must time out");

    assert_eq!(err.kind(), "fatal");
    assert!(err.to_string().contains("detection exceeded"));
}

#[tokio::test]
async fn vertical_boxes_are_discarded_as_false_detections() {
    let backend = Arc::new(RecordingBackend::new());
    let calls = backend.calls.clone();
    // 30px wide, 120px tall: a column, not a subtitle line.
    let detector = ScriptedDetector::with_boxes(vec![boxed(100, 220, 400, 430)]);

    let pipeline = FramePipeline::new(
        RegionMatcher::default(),
        Arc::new(detector),
        backend,
        settings(),
    );
    pipeline
        .process_frame(&tall_frame(), &stacked_regions())
        .await
        .expect("filtered frame passes through");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
