//! Core library for the subscrub subtitle-removal engine.
//!
//! The crate exposes the frame payload types shared across processing
//! stages, the crate-wide error taxonomy, and the orchestration surface
//! (scheduler, per-frame pipeline, region matcher) used by the CLI
//! application and by external API layers.

pub mod config;
pub mod detect;
pub mod inpaint;
pub mod media;
pub mod pipeline;
pub mod region;
pub mod scheduler;
pub mod task;

use std::{collections::hash_map::DefaultHasher, fmt::Display, hash::Hasher, sync::Arc};

use thiserror::Error;

use crate::config::PolicyLimits;

/// Convenient alias for a shared byte buffer.
pub type SharedBytes = Arc<[u8]>;

/// Metadata describing a single frame travelling through a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Content checksum keying the remote detector's per-image cache.
    pub checksum: String,
}

impl FrameMetadata {
    /// Validates the metadata against runtime policy constraints.
    pub fn validate(&self, policy: &PolicyLimits) -> Result<(), RemovalError> {
        if self.width == 0 || self.height == 0 {
            return Err(RemovalError::Fatal {
                stage: "frame",
                detail: format!(
                    "frame {} has degenerate dimensions {}x{}",
                    self.frame_index, self.width, self.height
                ),
            });
        }
        if self.width > policy.max_width || self.height > policy.max_height {
            return Err(RemovalError::Resource(format!(
                "resolution {}x{} exceeds policy bound {}x{}",
                self.width, self.height, policy.max_width, policy.max_height
            )));
        }
        if self.frame_index >= policy.max_frames_per_task {
            return Err(RemovalError::Resource(format!(
                "frame index {} exceeds policy task length {}",
                self.frame_index, policy.max_frames_per_task
            )));
        }
        Ok(())
    }
}

/// CPU-resident frame payload consumed and produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packed pixel bytes stored on the heap.
    pub data: SharedBytes,
    /// Number of bytes between the start of two consecutive rows.
    pub stride: usize,
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Builds a frame from packed pixel bytes, deriving stride and checksum.
    pub fn from_bytes(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        frame_index: u64,
        timestamp_ms: u64,
    ) -> Self {
        let checksum = content_checksum(&data);
        Self {
            stride: (width as usize * channels as usize).max(1),
            data: data.into(),
            metadata: FrameMetadata {
                frame_index,
                timestamp_ms,
                width,
                height,
                channels,
                checksum,
            },
        }
    }

    /// Returns the length in bytes of the pixel buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true when the buffer has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame(index={}, {}x{}, checksum={})",
            self.metadata.frame_index,
            self.metadata.width,
            self.metadata.height,
            self.metadata.checksum
        )
    }
}

/// Hashes frame content into the cache key used for remote detection reuse.
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    format!("{:016x}", hasher.finish())
}

/// Errors raised by the orchestration core, classified for the retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemovalError {
    /// Malformed submission input; the task is never created.
    #[error("validation failure: {0}")]
    Validation(String),
    /// Timeout or transient external failure; eligible for bounded retry.
    #[error("transient {stage} failure: {detail}")]
    Transient { stage: &'static str, detail: String },
    /// Unrecoverable failure; the owning task fails immediately.
    #[error("fatal {stage} failure: {detail}")]
    Fatal { stage: &'static str, detail: String },
    /// Cooperative cancellation observed at a frame boundary.
    #[error("task cancelled")]
    Cancelled,
    /// Admission or per-frame resource ceiling exceeded.
    #[error("resource limit: {0}")]
    Resource(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("task join failure: {0}")]
    Join(String),
}

impl RemovalError {
    /// True for failures that may be retried before escalating.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemovalError::Transient { .. })
    }

    /// Stable kind label exposed on the status surface.
    pub fn kind(&self) -> &'static str {
        match self {
            RemovalError::Validation(_) => "validation",
            RemovalError::Transient { .. } => "transient",
            RemovalError::Fatal { .. } => "fatal",
            RemovalError::Cancelled => "cancelled",
            RemovalError::Resource(_) => "resource",
            RemovalError::Config(_) => "config",
            RemovalError::Join(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for RemovalError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Result alias for orchestration operations.
pub type RemovalResult<T> = Result<T, RemovalError>;
