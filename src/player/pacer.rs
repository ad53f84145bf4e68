//! Frame pacer
//!
//! Releases queued frames to the pixel sink against the playback clock.
//! The schedule is index based: after each presented frame the next time is
//! `origin + frames_rendered * denominator / numerator`, so rounding never
//! accumulates. At most one frame is drawn per tick and none are skipped;
//! a pacer that fell behind catches up by drawing back to back.

use crate::decoder::{FrameQueue, FrameRate};
use crate::renderer::{fit_to_surface, PixelSink, PresentationMeter};
use crate::utils::error::{Result, SyncError};

/// What a render tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was drawn
    Presented { pts: i64 },
    /// The next frame is not due yet
    Waiting,
    /// A frame is due but the queue is empty
    Starved,
}

/// Index-scheduled frame pacer
#[derive(Debug)]
pub struct FramePacer {
    frame_rate: FrameRate,
    /// Stream time of frame index 0
    origin: f64,
    frames_rendered: u64,
    next_frame_time: f64,
    starved_ticks: u64,
    meter: PresentationMeter,
}

impl FramePacer {
    pub fn new(frame_rate: FrameRate, origin: f64) -> Self {
        Self {
            frame_rate,
            origin,
            frames_rendered: 0,
            next_frame_time: origin,
            starved_ticks: 0,
            meter: PresentationMeter::new(),
        }
    }

    /// Draw the head frame if it is due at `position`
    ///
    /// The frame is released whether or not the draw succeeds; a failed
    /// draw still advances the schedule and is returned as the error.
    pub fn tick_render(
        &mut self,
        position: f64,
        queue: &mut FrameQueue,
        sink: &mut dyn PixelSink,
    ) -> Result<TickOutcome> {
        if self.next_frame_time > position {
            return Ok(TickOutcome::Waiting);
        }
        let Some(frame) = queue.pop_frame() else {
            self.starved_ticks += 1;
            return Ok(TickOutcome::Starved);
        };

        let drawn = match fit_to_surface((frame.width, frame.height), sink.surface_size()) {
            Some(viewport) => sink.draw(&frame, viewport.width, viewport.height),
            None => Err(SyncError::not_ready(format!(
                "cannot fit {}x{} frame to {:?} surface",
                frame.width,
                frame.height,
                sink.surface_size()
            ))),
        };
        let pts = frame.pts;
        frame.close();

        self.frames_rendered += 1;
        self.next_frame_time = self.origin + self.frame_rate.frame_time(self.frames_rendered);
        if drawn.is_ok() {
            self.meter.record(pts);
        }
        log::trace!("Presented frame {} (next at {:.4}s)", pts, self.next_frame_time);

        drawn.map(|_| TickOutcome::Presented { pts })
    }

    /// Restart the schedule at `position` after a seek
    pub fn reset_to(&mut self, position: f64) {
        self.frames_rendered = self.frame_rate.index_at(position - self.origin);
        self.next_frame_time = position;
        self.meter.reset_window();
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn next_frame_time(&self) -> f64 {
        self.next_frame_time
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Ticks on which a frame was due but none was queued
    pub fn starved_ticks(&self) -> u64 {
        self.starved_ticks
    }

    pub fn presented(&self) -> u64 {
        self.meter.presented()
    }

    pub fn achieved_fps(&self) -> f64 {
        self.meter.fps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodedVideoFrame, FrameLease};
    use crate::renderer::RecordingSink;
    use crate::utils::secs_to_micros;
    use proptest::prelude::*;

    fn rate() -> FrameRate {
        FrameRate::new(30, 1).unwrap()
    }

    fn queue_with(rate: FrameRate, first: u64, count: u64) -> FrameQueue {
        let mut queue = FrameQueue::new(64);
        for index in first..first + count {
            let frame = DecodedVideoFrame::new(
                secs_to_micros(rate.frame_time(index)),
                33_333,
                160,
                90,
                Vec::new(),
                FrameLease::detached(),
            );
            queue.push_frame(0, frame);
        }
        queue
    }

    #[test]
    fn test_presents_one_frame_per_due_tick() {
        let rate = rate();
        let mut queue = queue_with(rate, 0, 5);
        let (mut sink, handle) = RecordingSink::new(640, 360);
        let mut pacer = FramePacer::new(rate, 0.0);

        assert_eq!(
            pacer.tick_render(0.0, &mut queue, &mut sink).unwrap(),
            TickOutcome::Presented { pts: 0 }
        );
        assert_eq!(pacer.tick_render(0.02, &mut queue, &mut sink).unwrap(), TickOutcome::Waiting);
        assert!(matches!(
            pacer.tick_render(0.034, &mut queue, &mut sink).unwrap(),
            TickOutcome::Presented { .. }
        ));

        // Far behind: still one frame per tick, in order
        for _ in 0..3 {
            pacer.tick_render(10.0, &mut queue, &mut sink).unwrap();
        }
        assert_eq!(pacer.tick_render(10.0, &mut queue, &mut sink).unwrap(), TickOutcome::Starved);
        assert_eq!(handle.len(), 5);
        assert_eq!(pacer.frames_rendered(), 5);
        assert_eq!(pacer.starved_ticks(), 1);

        let drawn = handle.last().unwrap();
        assert_eq!((drawn.dest_width, drawn.dest_height), (640, 360));
    }

    #[test]
    fn test_schedule_is_index_based() {
        let rate = FrameRate::new(30000, 1001).unwrap();
        let mut queue = queue_with(rate, 0, 40);
        let (mut sink, _handle) = RecordingSink::new(160, 90);
        let mut pacer = FramePacer::new(rate, 0.0);

        for _ in 0..40 {
            pacer.tick_render(100.0, &mut queue, &mut sink).unwrap();
        }
        assert_eq!(pacer.next_frame_time(), rate.frame_time(40));
    }

    #[test]
    fn test_reset_to_seek_target() {
        let rate = rate();
        let mut pacer = FramePacer::new(rate, 0.0);
        pacer.reset_to(5.0);
        assert_eq!(pacer.frames_rendered(), 150);
        assert_eq!(pacer.next_frame_time(), 5.0);

        let mut queue = queue_with(rate, 150, 1);
        let (mut sink, handle) = RecordingSink::new(160, 90);
        assert_eq!(pacer.tick_render(4.99, &mut queue, &mut sink).unwrap(), TickOutcome::Waiting);
        pacer.tick_render(5.0, &mut queue, &mut sink).unwrap();
        assert_eq!(handle.timestamps(), vec![5_000_000]);
        assert_eq!(pacer.frames_rendered(), 151);
    }

    #[test]
    fn test_failed_draw_releases_frame() {
        let rate = rate();
        let mut queue = queue_with(rate, 0, 2);
        let (mut sink, handle) = RecordingSink::new(0, 0);
        let mut pacer = FramePacer::new(rate, 0.0);

        let err = pacer.tick_render(1.0, &mut queue, &mut sink).unwrap_err();
        assert!(matches!(err, SyncError::ResourceNotReady(_)));
        assert_eq!(queue.len(), 1);
        assert!(handle.is_empty());
        assert_eq!(pacer.frames_rendered(), 1);
    }

    proptest! {
        #[test]
        fn prop_presentation_is_ordered_and_never_early(
            steps in proptest::collection::vec(0.0f64..0.1, 1..200),
        ) {
            let rate = rate();
            let mut queue = queue_with(rate, 0, 60);
            let (mut sink, handle) = RecordingSink::new(160, 90);
            let mut pacer = FramePacer::new(rate, 0.0);

            let mut position = 0.0;
            for step in steps {
                position += step;
                let scheduled = pacer.next_frame_time();
                if let TickOutcome::Presented { .. } = pacer.tick_render(position, &mut queue, &mut sink).unwrap() {
                    prop_assert!(scheduled <= position);
                }
            }

            let presented = handle.timestamps();
            prop_assert!(presented.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(presented.len() as u64, pacer.frames_rendered());
        }
    }
}
