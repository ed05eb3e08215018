//! Per-frame device-memory gate applied before each frame is processed.

use crate::{config::PolicyLimits, FrameMetadata, RemovalError, RemovalResult};

/// Reference frames a temporal inpainting backend keeps resident alongside
/// the frame under repair.
const REFERENCE_WINDOW: u64 = 4;

const BYTES_PER_MIB: f64 = (1024 * 1024) as f64;

/// Estimated device working set in mebibytes for inpainting one frame: the
/// packed pixel buffer plus its single-channel mask plane, held for every
/// frame in the reference window.
pub fn working_set_mb(metadata: &FrameMetadata) -> f64 {
    let plane = metadata.width as u64 * metadata.height as u64;
    let frame_and_mask = plane * metadata.channels as u64 + plane;
    (frame_and_mask * REFERENCE_WINDOW) as f64 / BYTES_PER_MIB
}

/// Rejects a frame whose working set would exceed the device budget before
/// any backend memory is committed.
pub fn admit(limits: &PolicyLimits, metadata: &FrameMetadata) -> RemovalResult<()> {
    let estimate = working_set_mb(metadata);
    if estimate > limits.max_frame_mb as f64 {
        return Err(RemovalError::Resource(format!(
            "frame {} working set {estimate:.1}MiB exceeds device budget {:.1}MiB",
            metadata.frame_index, limits.max_frame_mb
        )));
    }
    Ok(())
}
