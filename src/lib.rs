//! syncplay - audio-mastered A/V playback synchronization
//!
//! Compressed chunks flow from a [`decoder::MediaBackend`] through bounded
//! decode pipelines: video frames into a watermark-limited queue released by
//! an index-scheduled pacer, audio into a lock-free ring consumed by a
//! real-time sink whose progress is the master clock.
//!
//! The entry point is [`player::SyncController`].

pub mod audio;
pub mod decoder;
pub mod player;
pub mod renderer;
pub mod utils;

pub use player::{PlaybackStats, SyncController, SyncControllerBuilder, SyncEvent, SyncEventHandler, SyncState};
pub use utils::error::{Result, SyncError};
pub use utils::Config;
