//! Seek sequencing
//!
//! Playing -> Seeking -> Playing. Audio is paused and its ring discarded,
//! the video pipeline is rebuilt at the target, both are preloaded, and the
//! pacer and clock restart at the target before playback resumes. Seeks are
//! serialized; a second call waits for the first to finish.

use crate::player::{SyncController, SyncEvent, SyncState};
use crate::utils::error::{Result, SyncError};
use std::sync::atomic::Ordering;
use std::time::Instant;

impl SyncController {
    /// Seek to `position` seconds and resume playback there
    ///
    /// The target is clamped to the media's time range. Only valid while
    /// Playing; a failure after the engine entered Seeking stops it.
    pub async fn seek(&self, position: f64) -> Result<()> {
        if !position.is_finite() {
            return Err(SyncError::InvalidState(format!("cannot seek to {}", position)));
        }
        let _sequenced = self.inner.seek_lock.lock().await;
        let target = self.clamp_target(position);

        {
            let _gate = self.inner.tick_gate.write();
            let from = self.inner.state.transition(SyncState::Seeking)?;
            self.inner.emit(SyncEvent::StateChanged { from, to: SyncState::Seeking });
        }
        log::info!("Seeking to {:.3}s", target);

        match self.perform_seek(target).await {
            Ok(()) => Ok(()),
            // Stopped underneath us; `stop` owns the release
            Err(e) if self.inner.state.is_stopped() => {
                log::debug!("Seek to {:.3}s abandoned: {}", target, e);
                Err(e)
            }
            Err(e) => {
                self.fail("seek", &e).await;
                Err(e)
            }
        }
    }

    fn clamp_target(&self, position: f64) -> f64 {
        match self.inner.media_info.get() {
            Some(info) => {
                let start = info.start_time;
                let end = info.duration.as_secs_f64().max(start);
                position.clamp(start, end)
            }
            None => position.max(0.0),
        }
    }

    async fn perform_seek(&self, target: f64) -> Result<()> {
        let inner = &self.inner;
        let pipelines = inner.pipelines()?;

        pipelines.audio.seek(target).await?;
        let released = pipelines.video.restart_at(target).await?;
        let queued = self.preload(pipelines).await?;

        {
            let _gate = inner.tick_gate.write();
            pipelines.audio.play();
            if let Some(pacer) = inner.pacer.lock().as_mut() {
                pacer.reset_to(target);
            }
            if let Some(clock) = inner.clock.lock().as_mut() {
                clock.reanchor(target, Instant::now());
            }
            let from = inner.state.transition(SyncState::Playing)?;
            inner.eos_emitted.store(false, Ordering::Release);
            inner.seeks_completed.fetch_add(1, Ordering::Relaxed);
            inner.emit(SyncEvent::StateChanged { from, to: SyncState::Playing });
        }

        log::info!(
            "Seek to {:.3}s complete: {} stale frames released, {} preloaded",
            target,
            released,
            queued
        );
        inner.emit(SyncEvent::SeekCompleted { position: target });
        Ok(())
    }
}
