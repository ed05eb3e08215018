//! Text-detection boundary shared by local and remote detector variants.

pub mod remote;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{region::DetectedBox, Frame, RemovalResult};

pub use remote::{RemoteVisionDetector, TokenProvider};

/// Boundary to an external text detector. Each call re-runs detection and
/// yields a fresh, finite box sequence for the given frame.
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> RemovalResult<Vec<DetectedBox>>;
}

/// Deterministic detector replaying scripted boxes, used for dry runs and
/// wiring tests in place of a real OCR engine.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    every_frame: Vec<DetectedBox>,
    per_frame: HashMap<u64, Vec<DetectedBox>>,
}

impl ScriptedDetector {
    /// Reports the same boxes for every frame.
    pub fn with_boxes(boxes: Vec<DetectedBox>) -> Self {
        Self {
            every_frame: boxes,
            per_frame: HashMap::new(),
        }
    }

    /// Overrides the script for a specific frame index.
    pub fn script_frame(mut self, frame_index: u64, boxes: Vec<DetectedBox>) -> Self {
        self.per_frame.insert(frame_index, boxes);
        self
    }
}

#[async_trait]
impl TextDetector for ScriptedDetector {
    async fn detect(&self, frame: &Frame) -> RemovalResult<Vec<DetectedBox>> {
        Ok(self
            .per_frame
            .get(&frame.metadata.frame_index)
            .unwrap_or(&self.every_frame)
            .clone())
    }
}
