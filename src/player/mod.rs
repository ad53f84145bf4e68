//! Synchronization controller module for syncplay
//!
//! This module orchestrates playback: it owns the video and audio
//! sub-pipelines, the audio-mastered playback clock and the frame pacer,
//! drives the render loop, and sequences seeks through the
//! {Loading, Preloading, Playing, Seeking, Stopped} state machine.

mod clock;
mod controller;
mod pacer;
mod seek;
mod state;
mod video;

pub use clock::PlaybackClock;
pub use controller::{SinkFactory, SyncController, SyncControllerBuilder};
pub use pacer::{FramePacer, TickOutcome};
pub use state::StateMachine;
pub use video::{VideoPipeline, VideoSettings, VideoStats};

use crate::audio::AudioStats;
use serde::Serialize;
use std::fmt;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncState {
    /// Media info and decoders being set up
    Loading,

    /// Both pipelines filling before the first frame
    Preloading,

    /// Render loop presenting frames against the audio clock
    Playing,

    /// Pipelines being torn down and rebuilt at a new position
    Seeking,

    /// Terminal; every resource released
    Stopped,
}

impl SyncState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Loading, Preloading)
                | (Preloading, Playing)
                | (Playing, Seeking)
                | (Seeking, Playing)
                | (Loading | Preloading | Playing | Seeking, Stopped)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Loading => "loading",
            SyncState::Preloading => "preloading",
            SyncState::Playing => "playing",
            SyncState::Seeking => "seeking",
            SyncState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Playback statistics
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStats {
    pub state: SyncState,

    /// Clock position in seconds
    pub position: f64,

    /// Wall clock minus audio clock since the last anchor, in milliseconds
    pub drift_ms: Option<f64>,

    /// Pacer frame index
    pub frames_rendered: u64,

    /// Frames drawn to the pixel sink
    pub frames_presented: u64,

    /// Achieved presentation rate
    pub achieved_fps: f64,

    pub seeks_completed: u64,

    /// Render loop ticks that ran
    pub ticks: u64,

    pub video: VideoStats,

    pub audio: AudioStats,
}

/// Notification delivered to registered handlers
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The engine moved between states
    StateChanged { from: SyncState, to: SyncState },

    /// First transition to Playing
    PlaybackStarted { position: f64 },

    /// A seek resumed playback
    SeekCompleted { position: f64 },

    /// Both streams are exhausted and every queued frame was presented
    EndOfStream,

    /// A component reported an error
    Error { component: String, message: String },
}

/// Receives engine events
///
/// Called on the thread that raised the event, possibly the decoder's or
/// the render loop's; implementations must not block.
pub trait SyncEventHandler: Send + Sync {
    fn handle_event(&self, event: &SyncEvent);
}
