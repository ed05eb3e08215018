//! Frame transport boundaries standing in for the external demux/mux
//! collaborators, plus synthetic implementations used by dry runs and
//! wiring tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{Frame, RemovalResult};

/// Ordered pull of frames from the input media. Not restartable; frames
/// arrive in strict input order.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> RemovalResult<Option<Frame>>;

    /// Total frame count used for progress reporting.
    fn frame_count_hint(&self) -> u64;
}

/// Ordered push of processed frames toward the output media. Frames are
/// written in the order they were produced so downstream muxing can consume
/// a simple stream.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: Frame) -> RemovalResult<()>;

    /// Flushes and returns the output reference handed back to the caller.
    async fn finalize(&mut self) -> RemovalResult<String>;
}

/// Generates flat synthetic frames, mirroring how the production system
/// would pull decoded frames from its demuxer.
pub struct SyntheticSource {
    produced: u64,
    frame_count: u64,
    width: u32,
    height: u32,
    channels: u8,
    frame_period_ms: u64,
}

impl SyntheticSource {
    pub fn new(frame_count: u64, width: u32, height: u32, channels: u8) -> Self {
        Self {
            produced: 0,
            frame_count,
            width,
            height,
            channels,
            frame_period_ms: 40,
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> RemovalResult<Option<Frame>> {
        if self.produced >= self.frame_count {
            return Ok(None);
        }
        let index = self.produced;
        self.produced += 1;
        let len = self.width as usize * self.height as usize * self.channels as usize;
        // Vary the fill byte so frame checksums differ.
        let fill = (index % 251) as u8;
        Ok(Some(Frame::from_bytes(
            vec![fill; len],
            self.width,
            self.height,
            self.channels,
            index,
            index * self.frame_period_ms,
        )))
    }

    fn frame_count_hint(&self) -> u64 {
        self.frame_count
    }
}

/// Collects processed frames in memory behind a shared handle so tests and
/// dry runs can inspect the ordered output.
pub struct CollectSink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the collected output.
    pub fn handle(&self) -> Arc<Mutex<Vec<Frame>>> {
        self.frames.clone()
    }
}

impl Default for CollectSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSink for CollectSink {
    async fn write_frame(&mut self, frame: Frame) -> RemovalResult<()> {
        self.frames
            .lock()
            .expect("collect sink mutex poisoned")
            .push(frame);
        Ok(())
    }

    async fn finalize(&mut self) -> RemovalResult<String> {
        let count = self
            .frames
            .lock()
            .expect("collect sink mutex poisoned")
            .len();
        Ok(format!("memory://frames/{count}"))
    }
}
