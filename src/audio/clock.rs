//! Audio consumption clock
//!
//! The real-time rendering context advances this clock by the number of
//! frames it actually consumed, which makes it the master timeline for the
//! whole engine. Everything here is atomic so the audio callback never locks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Upper bits of `progress` hold the epoch, the rest the frames played
const EPOCH_SHIFT: u32 = 48;
const FRAME_MASK: u64 = (1 << EPOCH_SHIFT) - 1;

/// Position of the audio output, derived from frames consumed
#[derive(Debug)]
pub struct AudioClock {
    sample_rate: u32,
    /// Position in seconds (f64 bits) at which the frame count was zeroed
    base_position: AtomicU64,
    /// Epoch and frames played, packed so a reposition and an advance
    /// cannot interleave
    progress: AtomicU64,
    playing: AtomicBool,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            base_position: AtomicU64::new(0f64.to_bits()),
            progress: AtomicU64::new(0),
            playing: AtomicBool::new(false),
        }
    }

    /// Seconds of audio played from the stream origin
    pub fn position(&self) -> f64 {
        let base = f64::from_bits(self.base_position.load(Ordering::Acquire));
        base + self.frames_played() as f64 / f64::from(self.sample_rate)
    }

    /// Jump to `seconds` and start a new epoch; used while output is
    /// suspended for a seek
    pub fn set_position(&self, seconds: f64) {
        let next = (self.epoch() + 1) << EPOCH_SHIFT;
        self.base_position.store(seconds.max(0.0).to_bits(), Ordering::Release);
        self.progress.store(next, Ordering::Release);
    }

    /// Record `frames` consumed by the output
    pub fn advance(&self, frames: usize) {
        self.progress.fetch_add(frames as u64 & FRAME_MASK, Ordering::AcqRel);
    }

    /// Record `frames` consumed, unless the clock was repositioned since
    /// `epoch` was read
    ///
    /// Returns `false` when the frames belong to a discarded epoch.
    pub fn advance_in(&self, epoch: u64, frames: usize) -> bool {
        self.progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |progress| {
                (progress >> EPOCH_SHIFT == epoch).then(|| progress + (frames as u64 & FRAME_MASK))
            })
            .is_ok()
    }

    /// Bumped by every `set_position`
    pub fn epoch(&self) -> u64 {
        self.progress.load(Ordering::Acquire) >> EPOCH_SHIFT
    }

    /// Frames consumed since the last `set_position`
    pub fn frames_played(&self) -> u64 {
        self.progress.load(Ordering::Acquire) & FRAME_MASK
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
