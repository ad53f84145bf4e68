//! Volume control for syncplay
//!
//! The engine side sets a target gain through a [`VolumeHandle`]; the audio
//! rendering context applies it with [`VolumeRamp`], which approaches the
//! target exponentially so gain changes never click.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared target gain, settable from any thread
#[derive(Debug, Clone)]
pub struct VolumeHandle {
    target: Arc<AtomicU32>,
}

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self {
            target: Arc::new(AtomicU32::new(volume.clamp(0.0, 1.0).to_bits())),
        }
    }

    /// Set target volume (0.0 to 1.0)
    pub fn set(&self, volume: f32) {
        self.target.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.target.load(Ordering::Acquire))
    }
}

/// Exponential gain smoothing applied per frame on the output path
#[derive(Debug)]
pub struct VolumeRamp {
    handle: VolumeHandle,
    current: f32,
    /// Per-frame decay towards the target
    coefficient: f32,
    channels: usize,
}

impl VolumeRamp {
    /// Ramp with time constant `time_constant` seconds
    pub fn new(handle: VolumeHandle, sample_rate: u32, channels: usize, time_constant: f32) -> Self {
        let coefficient = if time_constant > 0.0 {
            (-1.0 / (time_constant * sample_rate.max(1) as f32)).exp()
        } else {
            0.0
        };
        Self {
            current: handle.get(),
            handle,
            coefficient,
            channels: channels.max(1),
        }
    }

    /// Current (smoothed) gain
    pub fn current(&self) -> f32 {
        self.current
    }

    /// Scale interleaved `samples` in place
    pub fn apply(&mut self, samples: &mut [f32]) {
        let target = self.handle.get();

        if (self.current - target).abs() < 1e-4 {
            self.current = target;
            if target != 1.0 {
                for sample in samples.iter_mut() {
                    *sample *= target;
                }
            }
            return;
        }

        for frame in samples.chunks_mut(self.channels) {
            self.current = target + (self.current - target) * self.coefficient;
            for sample in frame.iter_mut() {
                *sample *= self.current;
            }
        }
    }
}
