//! Renderer module for syncplay
//!
//! This module holds the pixel presentation contract the frame pacer draws
//! through, the aspect-fit geometry used for every draw, and the built-in
//! sinks: one that records what was presented and one that discards it.

mod frame;
mod recording;

pub use frame::PresentationMeter;
pub use recording::{NullSink, PresentedFrame, RecordingHandle, RecordingSink};

use crate::decoder::DecodedVideoFrame;
use crate::utils::error::Result;

/// Pixel presentation surface
pub trait PixelSink: Send {
    /// Current surface size in pixels
    fn surface_size(&self) -> (u32, u32);

    /// Draw a frame scaled to the destination size
    ///
    /// # Arguments
    ///
    /// * `frame` - Frame to draw; released by the caller afterwards
    /// * `dest_width` - Destination width after aspect fitting
    /// * `dest_height` - Destination height after aspect fitting
    fn draw(&mut self, frame: &DecodedVideoFrame, dest_width: u32, dest_height: u32) -> Result<()>;
}

/// Destination rectangle of a fitted frame, centered on the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale a frame uniformly so it fits inside the surface
///
/// Returns `None` when either size is degenerate.
pub fn fit_to_surface(frame: (u32, u32), surface: (u32, u32)) -> Option<Viewport> {
    let (fw, fh) = frame;
    let (sw, sh) = surface;
    if fw == 0 || fh == 0 || sw == 0 || sh == 0 {
        return None;
    }

    let scale = (f64::from(sw) / f64::from(fw)).min(f64::from(sh) / f64::from(fh));
    let width = ((f64::from(fw) * scale).round() as u32).clamp(1, sw);
    let height = ((f64::from(fh) * scale).round() as u32).clamp(1, sh);
    Some(Viewport {
        x: (sw - width) / 2,
        y: (sh - height) / 2,
        width,
        height,
    })
}
