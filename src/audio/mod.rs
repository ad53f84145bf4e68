//! Audio module for syncplay
//!
//! This module owns the audio half of playback: the lock-free sample ring,
//! the fill-scheduled pipeline that feeds it from the decoder, the audio
//! clock the whole engine follows, and the sinks that consume the ring in a
//! real-time context.

mod clock;
#[cfg(feature = "cpal")]
mod cpal_output;
mod pipeline;
pub mod ring_buffer;
mod sink;
mod volume;

pub use clock::AudioClock;
#[cfg(feature = "cpal")]
pub use cpal_output::CpalSink;
pub use pipeline::{AudioPipeline, AudioSettings, AudioStats};
pub use ring_buffer::{sample_ring, RingMonitor, RingStats, SampleConsumer, SampleProducer};
pub use sink::{ManualSink, ManualSinkHandle, RealtimeSink};
pub use volume::{VolumeHandle, VolumeRamp};

use crate::utils::error::Result;

/// Audio format specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels
    pub channels: usize,
}

impl AudioFormat {
    /// Number of samples (all channels) covering `seconds`
    pub fn samples_for(&self, seconds: f64) -> usize {
        self.frames_for(seconds) * self.channels
    }

    /// Number of frames covering `seconds`, rounded up
    pub fn frames_for(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * f64::from(self.sample_rate) - 1e-9).ceil().max(0.0) as usize
    }

    /// Duration of `samples` interleaved samples
    pub fn samples_to_secs(&self, samples: usize) -> f64 {
        samples as f64 / (f64::from(self.sample_rate.max(1)) * self.channels.max(1) as f64)
    }
}

/// Real-time consumer of the sample ring
///
/// The sink receives the ring consumer once, at setup, and pulls from it at
/// the device rate for as long as it runs. Pausing is expressed through the
/// audio clock the consumer carries, so the sink keeps servicing seek
/// discards while playback is suspended.
pub trait AudioSink: Send {
    /// Take ownership of the consumer and start the rendering context
    ///
    /// # Arguments
    ///
    /// * `consumer` - Consumer half of the sample ring
    fn start(&mut self, consumer: SampleConsumer) -> Result<()>;

    /// Resume device output
    fn resume(&mut self) -> Result<()>;

    /// Suspend device output
    fn suspend(&mut self) -> Result<()>;

    /// Tear down the rendering context
    fn close(&mut self);

    /// Name for logging
    fn name(&self) -> &str;
}
