//! Built-in pixel sinks

use crate::decoder::DecodedVideoFrame;
use crate::renderer::PixelSink;
use crate::utils::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// One draw seen by a [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub pts: i64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub dest_width: u32,
    pub dest_height: u32,
    pub at: Instant,
}

/// Pixel sink that records every draw without keeping pixel data
pub struct RecordingSink {
    size: (u32, u32),
    log: Arc<Mutex<Vec<PresentedFrame>>>,
}

/// Read side of a [`RecordingSink`]
#[derive(Clone)]
pub struct RecordingHandle {
    log: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl RecordingSink {
    pub fn new(width: u32, height: u32) -> (RecordingSink, RecordingHandle) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingSink { size: (width, height), log: log.clone() },
            RecordingHandle { log },
        )
    }
}

impl PixelSink for RecordingSink {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn draw(&mut self, frame: &DecodedVideoFrame, dest_width: u32, dest_height: u32) -> Result<()> {
        self.log.lock().push(PresentedFrame {
            pts: frame.pts,
            frame_width: frame.width,
            frame_height: frame.height,
            dest_width,
            dest_height,
            at: Instant::now(),
        });
        Ok(())
    }
}

impl RecordingHandle {
    /// Every draw so far, in presentation order
    pub fn frames(&self) -> Vec<PresentedFrame> {
        self.log.lock().clone()
    }

    /// Timestamps of every draw so far
    pub fn timestamps(&self) -> Vec<i64> {
        self.log.lock().iter().map(|f| f.pts).collect()
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    pub fn last(&self) -> Option<PresentedFrame> {
        self.log.lock().last().cloned()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

/// Pixel sink that drops every frame
#[derive(Debug, Clone, Copy)]
pub struct NullSink {
    size: (u32, u32),
}

impl NullSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self { size: (width, height) }
    }
}

impl PixelSink for NullSink {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn draw(&mut self, _frame: &DecodedVideoFrame, _dest_width: u32, _dest_height: u32) -> Result<()> {
        Ok(())
    }
}
