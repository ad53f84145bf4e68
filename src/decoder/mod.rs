//! Decoder module for syncplay
//!
//! This module holds the data model that flows through the decode pipelines
//! (compressed chunks, decoded video frames and audio blocks) and the narrow
//! contracts of the external collaborators: the chunk source and the opaque
//! decode unit, both reached through a [`MediaBackend`] handle.

mod backpressure;
mod chunk_stream;
mod frame_pool;
mod frame_queue;
pub mod synthetic;

pub use backpressure::{DecodeController, DecodeCounters, DecodeStats, SubmitOutcome};
pub use chunk_stream::{ChunkSender, ChunkStream, StreamCancel};
pub use frame_pool::{FrameLease, FramePool};
pub use frame_queue::{FrameQueue, PushOutcome, QueueStats};

use crate::utils::error::{Result, SyncError};
use crate::utils::{micros_to_secs, SharedReporter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Track a chunk or decoder belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// How a chunk source positions itself when reading from a start time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Start at the first chunk at or after the start time, key frame or not
    Any,
    /// Start at the key frame at or before the start time
    Keyframe,
}

/// Compressed unit produced by the chunk source
///
/// Consumed exactly once by a decode controller.
#[derive(Debug, Clone)]
pub struct CompressedChunk {
    /// Track the chunk belongs to
    pub track: TrackKind,

    /// Position of the chunk within its stream, starting at 0 for each read
    pub sequence: u64,

    /// Presentation timestamp in microseconds
    pub pts: i64,

    /// Duration in microseconds
    pub duration: i64,

    /// Whether the chunk decodes without references
    pub key: bool,

    /// Opaque compressed payload
    pub payload: Vec<u8>,
}

impl CompressedChunk {
    /// Presentation timestamp in seconds
    pub fn timestamp(&self) -> f64 {
        micros_to_secs(self.pts)
    }
}

/// Rational frame rate, e.g. 30000/1001
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    /// Create a frame rate; both terms must be non-zero
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if numerator == 0 || denominator == 0 {
            return Err(SyncError::Configuration(format!(
                "Invalid frame rate {}/{}",
                numerator, denominator
            )));
        }
        Ok(Self { numerator, denominator })
    }

    /// Parse the `num/den` form used by container metadata, or a bare integer
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || SyncError::Configuration(format!("Invalid frame rate '{}'", text));
        let (num, den) = match text.trim().split_once('/') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (text.trim(), "1"),
        };
        let num = num.parse::<u32>().map_err(|_| invalid())?;
        let den = den.parse::<u32>().map_err(|_| invalid())?;
        Self::new(num, den)
    }

    /// Frames per second as a float, for display only
    pub fn as_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }

    /// Duration of one frame in seconds
    pub fn period(&self) -> f64 {
        f64::from(self.denominator) / f64::from(self.numerator)
    }

    /// Scheduled time of frame `index` relative to the stream origin
    ///
    /// Computed from the index so rounding error never accumulates.
    pub fn frame_time(&self, index: u64) -> f64 {
        index as f64 * f64::from(self.denominator) / f64::from(self.numerator)
    }

    /// Index of the frame scheduled at or before `seconds`
    pub fn index_at(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 {
            return 0;
        }
        let exact = seconds * f64::from(self.numerator) / f64::from(self.denominator);
        (exact + 1e-9).floor() as u64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Video track information
#[derive(Debug, Clone)]
pub struct VideoTrackInfo {
    /// Codec string
    pub codec: String,

    /// Coded width
    pub width: u32,

    /// Coded height
    pub height: u32,

    /// Average frame rate
    pub frame_rate: FrameRate,

    /// Codec-specific description bytes
    pub extradata: Vec<u8>,
}

/// Audio track information
#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    /// Codec string
    pub codec: String,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels
    pub channels: u16,

    /// Codec-specific description bytes
    pub extradata: Vec<u8>,
}

/// Media information
#[derive(Debug, Clone)]
pub struct MediaInfo {
    /// Source name or URL
    pub source: String,

    /// Total duration
    pub duration: Duration,

    /// Timestamp of the first frame in seconds
    pub start_time: f64,

    /// Selected video track
    pub video: Option<VideoTrackInfo>,

    /// Selected audio track
    pub audio: Option<AudioTrackInfo>,
}

impl MediaInfo {
    /// The video track, which playback requires
    pub fn video_track(&self) -> Result<&VideoTrackInfo> {
        self.video
            .as_ref()
            .ok_or_else(|| SyncError::Configuration(format!("{} has no video track", self.source)))
    }

    /// The audio track, which playback requires
    pub fn audio_track(&self) -> Result<&AudioTrackInfo> {
        self.audio
            .as_ref()
            .ok_or_else(|| SyncError::Configuration(format!("{} has no audio track", self.source)))
    }
}

/// Configuration handed to a decode unit before its first chunk
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderConfig {
    Video {
        codec: String,
        coded_width: u32,
        coded_height: u32,
        description: Vec<u8>,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
        description: Vec<u8>,
    },
}

impl DecoderConfig {
    pub fn for_video(track: &VideoTrackInfo) -> Self {
        DecoderConfig::Video {
            codec: track.codec.clone(),
            coded_width: track.width,
            coded_height: track.height,
            description: track.extradata.clone(),
        }
    }

    pub fn for_audio(track: &AudioTrackInfo) -> Self {
        DecoderConfig::Audio {
            codec: track.codec.clone(),
            sample_rate: track.sample_rate,
            channels: track.channels,
            description: track.extradata.clone(),
        }
    }

    pub fn track(&self) -> TrackKind {
        match self {
            DecoderConfig::Video { .. } => TrackKind::Video,
            DecoderConfig::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// Lifecycle of a decode unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Unconfigured,
    Configured,
    Closed,
}

/// Decoded video frame
///
/// Owned by the frame queue from arrival until it is drawn or flushed. The
/// frame holds a lease on the decoder's buffer pool; `close` returns it, and
/// dropping the frame returns it on every other path.
#[derive(Debug)]
pub struct DecodedVideoFrame {
    /// Presentation timestamp in microseconds
    pub pts: i64,

    /// Duration in microseconds
    pub duration: i64,

    /// Display width
    pub width: u32,

    /// Display height
    pub height: u32,

    /// Packed RGBA pixels
    pub pixels: Vec<u8>,

    lease: FrameLease,
}

impl DecodedVideoFrame {
    pub fn new(pts: i64, duration: i64, width: u32, height: u32, pixels: Vec<u8>, lease: FrameLease) -> Self {
        Self { pts, duration, width, height, pixels, lease }
    }

    /// Presentation timestamp in seconds
    pub fn timestamp(&self) -> f64 {
        micros_to_secs(self.pts)
    }

    /// Release the frame and its pooled buffer
    pub fn close(self) {
        drop(self.lease);
    }
}

/// Native layout of decoded audio samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    F32Planar,
    F32Interleaved,
    S16Interleaved,
}

/// Sample storage of a decoded audio block
#[derive(Debug, Clone)]
pub enum AudioData {
    F32(Vec<f32>),
    S16(Vec<i16>),
}

impl AudioData {
    fn len(&self) -> usize {
        match self {
            AudioData::F32(samples) => samples.len(),
            AudioData::S16(samples) => samples.len(),
        }
    }
}

/// Decoded audio block in the decoder's native layout
#[derive(Debug, Clone)]
pub struct DecodedAudioBlock {
    /// Presentation timestamp in microseconds
    pub pts: i64,
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per channel
    pub frames: usize,
    pub layout: SampleLayout,
    data: AudioData,
}

impl DecodedAudioBlock {
    /// Build a block, checking that the storage matches layout and size
    pub fn new(
        pts: i64,
        sample_rate: u32,
        channels: usize,
        frames: usize,
        layout: SampleLayout,
        data: AudioData,
    ) -> Result<Self> {
        let layout_matches = matches!(
            (layout, &data),
            (SampleLayout::F32Planar, AudioData::F32(_))
                | (SampleLayout::F32Interleaved, AudioData::F32(_))
                | (SampleLayout::S16Interleaved, AudioData::S16(_))
        );
        if !layout_matches {
            return Err(SyncError::decode_error(format!("{:?} block with mismatched sample type", layout)));
        }
        if channels == 0 || data.len() != frames * channels {
            return Err(SyncError::decode_error(format!(
                "audio block holds {} samples, expected {} frames x {} channels",
                data.len(),
                frames,
                channels
            )));
        }
        Ok(Self { pts, sample_rate, channels, frames, layout, data })
    }

    /// Duration of the block in seconds
    pub fn duration(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Copy one channel into `dest` as f32 samples
    ///
    /// `dest` must hold at least `frames` samples.
    pub fn copy_channel_to(&self, channel: usize, dest: &mut [f32]) -> Result<()> {
        if channel >= self.channels {
            return Err(SyncError::decode_error(format!(
                "channel {} out of range for {}-channel block",
                channel, self.channels
            )));
        }
        if dest.len() < self.frames {
            return Err(SyncError::Internal(format!(
                "plane buffer of {} samples cannot hold {} frames",
                dest.len(),
                self.frames
            )));
        }

        let dest = &mut dest[..self.frames];
        match (&self.data, self.layout) {
            (AudioData::F32(samples), SampleLayout::F32Planar) => {
                let start = channel * self.frames;
                dest.copy_from_slice(&samples[start..start + self.frames]);
            }
            (AudioData::F32(samples), _) => {
                for (out, frame) in dest.iter_mut().zip(samples.chunks_exact(self.channels)) {
                    *out = frame[channel];
                }
            }
            (AudioData::S16(samples), _) => {
                for (out, frame) in dest.iter_mut().zip(samples.chunks_exact(self.channels)) {
                    *out = f32::from(frame[channel]) / 32768.0;
                }
            }
        }
        Ok(())
    }

    /// Release the block after its samples were copied out
    pub fn close(self) {}
}

/// Callback receiving decoded units, in timestamp order for video
pub type OutputCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callbacks a decode unit reports through
pub struct DecoderCallbacks<T> {
    /// Decoded output
    pub output: OutputCallback<T>,

    /// Errors raised after `decode` already returned
    pub error: SharedReporter,
}

/// Opaque decode black box
///
/// Accepts compressed chunks and asynchronously emits decoded units through
/// the output callback it was constructed with.
pub trait DecodeUnit: Send {
    /// Apply the decoder configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Track configuration derived from media info
    fn configure(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Queue a chunk for decoding
    ///
    /// # Returns
    ///
    /// `Decode` when the chunk is rejected; `ResourceNotReady` when the unit
    /// is unconfigured or closed
    fn decode(&mut self, chunk: CompressedChunk) -> Result<()>;

    /// Units submitted but not yet emitted
    fn decode_queue_size(&self) -> usize;

    /// Current lifecycle state
    fn state(&self) -> DecoderState;

    /// Stop decoding and drop all pending work
    fn close(&mut self);
}

/// Handle to the demuxing and decoding collaborators of one media source
pub trait MediaBackend: Send + Sync {
    /// Describe the source's tracks
    fn media_info(&self) -> Result<MediaInfo>;

    /// Open a chunk stream for `track`
    ///
    /// # Arguments
    ///
    /// * `track` - Track to read
    /// * `start` - Start time in seconds
    /// * `end` - End time in seconds; 0 reads to the end of the track
    /// * `mode` - Positioning rule at `start`
    fn read(&self, track: TrackKind, start: f64, end: f64, mode: SeekMode) -> Result<ChunkStream>;

    /// Create an unconfigured video decode unit
    fn create_video_decoder(&self, callbacks: DecoderCallbacks<DecodedVideoFrame>) -> Result<Box<dyn DecodeUnit>>;

    /// Create an unconfigured audio decode unit
    fn create_audio_decoder(&self, callbacks: DecoderCallbacks<DecodedAudioBlock>) -> Result<Box<dyn DecodeUnit>>;
}
