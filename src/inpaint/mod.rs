//! Inpainting backend capability set and mask construction.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    region::{DetectedBox, RegionSet},
    Frame, RemovalError, RemovalResult,
};

/// Closed set of supported inpainting algorithms, selected explicitly at
/// submission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lower")]
pub enum Algorithm {
    Sttn,
    Lama,
    ProPainter,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sttn => "sttn",
            Algorithm::Lama => "lama",
            Algorithm::ProPainter => "propainter",
        }
    }

    /// Whether the backend can consume the caller's region set directly as
    /// the mask, allowing per-frame detection to be skipped. LAMA needs
    /// detected boxes; the temporal backends propagate from neighbours.
    pub fn accepts_region_mask(self) -> bool {
        matches!(self, Algorithm::Sttn | Algorithm::ProPainter)
    }

    pub fn all() -> [Algorithm; 3] {
        [Algorithm::Sttn, Algorithm::Lama, Algorithm::ProPainter]
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-channel inpainting mask sized like its frame. Painted pixels are
/// 255, untouched pixels 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: Vec<u8>,
    width: u32,
    height: u32,
    painted: u64,
}

impl Mask {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize],
            width,
            height,
            painted: 0,
        }
    }

    /// Unions detected boxes into a mask, dilating each by `margin` pixels
    /// to absorb detector jitter at the edges.
    pub fn from_boxes(width: u32, height: u32, boxes: &[DetectedBox], margin: u32) -> Self {
        let mut mask = Self::blank(width, height);
        for boxed in boxes {
            mask.paint(
                boxed.y_min.saturating_sub(margin),
                boxed.y_max.saturating_add(margin),
                boxed.x_min.saturating_sub(margin),
                boxed.x_max.saturating_add(margin),
            );
        }
        mask
    }

    /// Rasterizes the caller's region set directly, used by backends that
    /// operate without per-frame detection.
    pub fn from_regions(width: u32, height: u32, regions: &RegionSet, margin: u32) -> Self {
        let mut mask = Self::blank(width, height);
        for region in regions.iter() {
            mask.paint(
                region.y_min.saturating_sub(margin),
                region.y_max.saturating_add(margin),
                region.x_min.saturating_sub(margin),
                region.x_max.saturating_add(margin),
            );
        }
        mask
    }

    fn paint(&mut self, y_min: u32, y_max: u32, x_min: u32, x_max: u32) {
        let y_max = y_max.min(self.height);
        let x_max = x_max.min(self.width);
        if y_min >= y_max || x_min >= x_max {
            return;
        }
        for y in y_min..y_max {
            let row = y as usize * self.width as usize;
            for x in x_min..x_max {
                let idx = row + x as usize;
                if self.data[idx] == 0 {
                    self.data[idx] = 255;
                    self.painted += 1;
                }
            }
        }
    }

    /// True when no pixel is painted; an empty mask means the frame passes
    /// through unmodified.
    pub fn is_empty(&self) -> bool {
        self.painted == 0
    }

    pub fn painted_pixels(&self) -> u64 {
        self.painted
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Boundary to an external inpainting model: `(frame, mask)` in, repaired
/// frame out.
#[async_trait]
pub trait InpaintBackend: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    async fn inpaint(&self, frame: &Frame, mask: &Mask) -> RemovalResult<Frame>;
}

/// Backend returning the frame untouched. Stands in for model bindings in
/// dry runs and wiring tests.
pub struct PassthroughBackend {
    algorithm: Algorithm,
}

impl PassthroughBackend {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }
}

#[async_trait]
impl InpaintBackend for PassthroughBackend {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    async fn inpaint(&self, frame: &Frame, _mask: &Mask) -> RemovalResult<Frame> {
        Ok(frame.clone())
    }
}

/// Capability lookup from algorithm to its registered backend.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<Algorithm, Arc<dyn InpaintBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn InpaintBackend>) {
        self.backends.insert(backend.algorithm(), backend);
    }

    pub fn get(&self, algorithm: Algorithm) -> RemovalResult<Arc<dyn InpaintBackend>> {
        self.backends.get(&algorithm).cloned().ok_or_else(|| {
            RemovalError::Validation(format!("no backend registered for algorithm {algorithm}"))
        })
    }

    /// Registers passthrough stand-ins for every algorithm.
    pub fn passthrough() -> Self {
        let mut set = Self::new();
        for algorithm in Algorithm::all() {
            set.register(Arc::new(PassthroughBackend::new(algorithm)));
        }
        set
    }
}
