//! Audio-mastered playback clock
//!
//! The position is read every tick from the audio output's consumption
//! progress. The wall clock is only used to hold an anchor (the instant
//! that corresponds to position zero of the current epoch) so drift
//! between the two can be measured.
//!
//! Startup: once audio output resumes, the clock waits until the audio
//! position moves off the value it had when waiting began, or that value
//! is already past the start threshold. A start timeout anchors anyway.

use crate::audio::AudioClock;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Waiting { initial: f64, since: Instant },
    Running { anchor: Instant, anchor_position: f64 },
}

/// Playback clock driven by audio consumption
#[derive(Debug)]
pub struct PlaybackClock {
    audio: Arc<AudioClock>,
    start_threshold: f64,
    start_timeout: Duration,
    phase: Phase,
    position: f64,
}

impl PlaybackClock {
    pub fn new(audio: Arc<AudioClock>, start_threshold: f64, start_timeout: Duration) -> Self {
        let position = audio.position();
        Self {
            audio,
            start_threshold,
            start_timeout,
            phase: Phase::Idle,
            position,
        }
    }

    /// Begin waiting for audio to start moving
    pub fn arm(&mut self, now: Instant) {
        let initial = self.audio.position();
        self.position = initial;
        self.phase = Phase::Waiting { initial, since: now };
    }

    /// Anchor if audio has started; returns whether the clock is running
    pub fn try_establish(&mut self, now: Instant) -> bool {
        let (initial, since) = match self.phase {
            Phase::Running { .. } => return true,
            Phase::Idle => return false,
            Phase::Waiting { initial, since } => (initial, since),
        };

        let audio = self.audio.position();
        let started = audio != initial || initial >= self.start_threshold;
        if !started {
            if now.saturating_duration_since(since) < self.start_timeout {
                return false;
            }
            log::warn!(
                "Audio position stuck at {:.3}s for {:?}, anchoring clock anyway",
                audio,
                self.start_timeout
            );
        }

        self.anchor_at(now, audio);
        log::debug!("Clock anchored at {:.3}s", audio);
        true
    }

    /// Per-tick read; `None` until the clock is established
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        if !self.try_establish(now) {
            return None;
        }
        self.position = self.position.max(self.audio.position());
        Some(self.position)
    }

    /// Jump to `position` after a seek and anchor there
    pub fn reanchor(&mut self, position: f64, now: Instant) {
        self.anchor_at(now, position);
        log::debug!("Clock re-anchored at {:.3}s", position);
    }

    fn anchor_at(&mut self, now: Instant, position: f64) {
        self.position = position;
        self.phase = Phase::Running { anchor: now, anchor_position: position };
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running { .. })
    }

    /// Last position read
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Wall-clock instant at which position zero would have played
    ///
    /// `None` before the clock is anchored, or when that instant predates
    /// what the platform's monotonic clock can represent.
    pub fn anchor_time(&self) -> Option<Instant> {
        match self.phase {
            Phase::Running { anchor, anchor_position } => {
                anchor.checked_sub(Duration::from_secs_f64(anchor_position.max(0.0)))
            }
            _ => None,
        }
    }

    /// Position implied by the wall clock since the anchor
    pub fn wall_position(&self, now: Instant) -> Option<f64> {
        match self.phase {
            Phase::Running { anchor, anchor_position } => {
                Some(anchor_position + now.saturating_duration_since(anchor).as_secs_f64())
            }
            _ => None,
        }
    }

    /// Wall position minus audio position, in seconds
    pub fn drift(&self, now: Instant) -> Option<f64> {
        self.wall_position(now).map(|wall| wall - self.audio.position())
    }
}
