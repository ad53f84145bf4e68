//! Decoded frame buffering between the decoder and the pacer
//!
//! A strictly FIFO queue bounded by a high-watermark. Frames are kept in
//! arrival order, which is presentation order for a well-behaved decoder.
//! A generation counter, bumped on every flush, lets late output from a
//! torn-down decoder be recognised and released instead of queued.

use crate::decoder::DecodedVideoFrame;
use std::collections::VecDeque;

/// Frame queue for buffering decoded frames
pub struct FrameQueue {
    /// Frames in arrival order
    frames: VecDeque<DecodedVideoFrame>,

    /// Maximum number of queued frames
    high_watermark: usize,

    /// Frames below this PTS are released on arrival
    floor_pts: Option<i64>,

    /// Incremented on every flush
    generation: u64,

    /// Statistics
    stats: QueueStats,

    /// Last queued PTS for ordering validation
    last_pts: Option<i64>,
}

/// Result of offering a frame to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame appended
    Queued,
    /// Frame predates the seek floor and was released
    BelowFloor,
    /// Frame came from a decoder generation that has been flushed
    Stale,
    /// Queue was at its high-watermark; frame released
    Overflow,
}

/// Queue statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Total frames queued
    pub frames_added: u64,

    /// Total frames handed to the pacer
    pub frames_consumed: u64,

    /// Frames released by flushes
    pub frames_flushed: u64,

    /// Frames released on arrival (below floor or stale generation)
    pub frames_discarded: u64,

    /// Frames refused at the high-watermark
    pub frames_overflowed: u64,

    /// Maximum queue depth reached
    pub max_depth: usize,
}

impl FrameQueue {
    /// Create a new frame queue bounded by `high_watermark`
    pub fn new(high_watermark: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(high_watermark),
            high_watermark,
            floor_pts: None,
            generation: 0,
            stats: QueueStats::default(),
            last_pts: None,
        }
    }

    /// Current generation; decoders tag their output with it
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Offer a frame produced by decoder generation `generation`
    pub fn push_frame(&mut self, generation: u64, frame: DecodedVideoFrame) -> PushOutcome {
        if generation != self.generation {
            log::trace!("Releasing frame {} from flushed generation {}", frame.pts, generation);
            self.stats.frames_discarded += 1;
            frame.close();
            return PushOutcome::Stale;
        }

        if let Some(floor) = self.floor_pts {
            if frame.pts < floor {
                log::trace!("Releasing frame {} below seek floor {}", frame.pts, floor);
                self.stats.frames_discarded += 1;
                frame.close();
                return PushOutcome::BelowFloor;
            }
        }

        if self.frames.len() >= self.high_watermark {
            log::warn!(
                "Frame queue at high-watermark {}, releasing frame {}",
                self.high_watermark,
                frame.pts
            );
            self.stats.frames_overflowed += 1;
            frame.close();
            return PushOutcome::Overflow;
        }

        // Validate PTS ordering
        if let Some(last_pts) = self.last_pts {
            if frame.pts < last_pts {
                log::warn!("Frame PTS {} is less than last PTS {}, possible ordering issue",
                    frame.pts, last_pts);
            }
        }

        self.last_pts = Some(frame.pts);
        self.frames.push_back(frame);

        self.stats.frames_added += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());

        PushOutcome::Queued
    }

    /// Pop the next frame from the queue
    pub fn pop_frame(&mut self) -> Option<DecodedVideoFrame> {
        let frame = self.frames.pop_front()?;
        self.stats.frames_consumed += 1;
        Some(frame)
    }

    /// Peek at the next frame without removing it
    pub fn peek_frame(&self) -> Option<&DecodedVideoFrame> {
        self.frames.front()
    }

    /// Release every queued frame and open a new generation
    ///
    /// Returns the number of frames released.
    pub fn flush(&mut self) -> usize {
        let released = self.frames.len();
        for frame in self.frames.drain(..) {
            frame.close();
        }
        self.generation += 1;
        self.last_pts = None;
        self.stats.frames_flushed += released as u64;
        released
    }

    /// Release frames below `floor_pts` from now on; `None` accepts all
    pub fn set_floor(&mut self, floor_pts: Option<i64>) {
        self.floor_pts = floor_pts;
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Maximum number of queued frames
    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// Get queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

impl Drop for FrameQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::FramePool;
    use proptest::prelude::*;

    fn create_test_frame(pool: &FramePool, pts: i64) -> DecodedVideoFrame {
        DecodedVideoFrame::new(pts, 33_333, 4, 2, vec![0; 4 * 2 * 4], pool.lease())
    }

    #[test]
    fn test_frame_queue_basic() {
        let pool = FramePool::new();
        let mut queue = FrameQueue::new(10);

        assert!(queue.is_empty());
        assert_eq!(queue.push_frame(0, create_test_frame(&pool, 0)), PushOutcome::Queued);
        queue.push_frame(0, create_test_frame(&pool, 33_333));
        queue.push_frame(0, create_test_frame(&pool, 66_667));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop_frame().unwrap().pts, 0);
        assert_eq!(queue.pop_frame().unwrap().pts, 33_333);
        assert_eq!(queue.len(), 1);
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_arrival_order_is_kept() {
        let pool = FramePool::new();
        let mut queue = FrameQueue::new(10);

        queue.push_frame(0, create_test_frame(&pool, 66_667));
        queue.push_frame(0, create_test_frame(&pool, 0));

        assert_eq!(queue.pop_frame().unwrap().pts, 66_667);
        assert_eq!(queue.pop_frame().unwrap().pts, 0);
    }

    #[test]
    fn test_high_watermark_refuses_without_eviction() {
        let pool = FramePool::new();
        let mut queue = FrameQueue::new(3);

        for i in 0..3 {
            queue.push_frame(0, create_test_frame(&pool, i * 1000));
        }
        assert_eq!(queue.len(), queue.high_watermark());

        assert_eq!(queue.push_frame(0, create_test_frame(&pool, 3000)), PushOutcome::Overflow);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.stats().frames_overflowed, 1);
        assert_eq!(queue.peek_frame().unwrap().pts, 0);
        assert_eq!(pool.live(), 3);
    }

    #[test]
    fn test_flush_releases_and_rejects_stale_generation() {
        let pool = FramePool::new();
        let mut queue = FrameQueue::new(10);
        queue.push_frame(0, create_test_frame(&pool, 0));
        queue.push_frame(0, create_test_frame(&pool, 1000));

        assert_eq!(queue.flush(), 2);
        assert_eq!(pool.live(), 0);
        assert_eq!(queue.generation(), 1);

        assert_eq!(queue.push_frame(0, create_test_frame(&pool, 2000)), PushOutcome::Stale);
        assert!(queue.is_empty());
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_seek_floor() {
        let pool = FramePool::new();
        let mut queue = FrameQueue::new(10);
        queue.set_floor(Some(5_000_000));

        assert_eq!(queue.push_frame(0, create_test_frame(&pool, 4_966_667)), PushOutcome::BelowFloor);
        assert_eq!(queue.push_frame(0, create_test_frame(&pool, 5_000_000)), PushOutcome::Queued);
        assert_eq!(queue.stats().frames_discarded, 1);
        assert_eq!(pool.live(), 1);
    }

    #[test]
    fn test_drop_releases_frames() {
        let pool = FramePool::new();
        {
            let mut queue = FrameQueue::new(4);
            queue.push_frame(0, create_test_frame(&pool, 0));
            queue.push_frame(0, create_test_frame(&pool, 1));
        }
        assert_eq!(pool.live(), 0);
    }

    proptest! {
        #[test]
        fn prop_length_never_exceeds_watermark(
            watermark in 1usize..40,
            ops in proptest::collection::vec(any::<bool>(), 0..400),
        ) {
            let pool = FramePool::new();
            let mut queue = FrameQueue::new(watermark);
            let mut pts = 0;
            for push in ops {
                if push {
                    queue.push_frame(queue.generation(), create_test_frame(&pool, pts));
                    pts += 1000;
                } else {
                    queue.pop_frame();
                }
                prop_assert!(queue.len() <= watermark);
            }
            prop_assert!(queue.stats().max_depth <= watermark);
        }
    }
}
