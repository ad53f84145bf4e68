//! Video sub-pipeline
//!
//! Chunk stream, decode controller and frame queue for the video track.
//! Submission is throttled so that frames queued plus frames still inside
//! the decoder never reach the queue's high-watermark. A seek tears the
//! whole pipeline down and rebuilds it at the target, releasing frames that
//! land below the target on arrival.

use crate::decoder::{
    ChunkStream, DecodeController, DecodeCounters, DecodedVideoFrame, DecoderCallbacks, DecoderConfig, FrameQueue, FrameRate,
    MediaBackend, PushOutcome, SeekMode, StreamCancel, SubmitOutcome, TrackKind, VideoTrackInfo,
};
use crate::utils::config::Config;
use crate::utils::error::{Result, SyncError};
use crate::utils::{secs_to_micros, SharedReporter};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Poll interval while waiting for decoded frames
const ARRIVAL_POLL: Duration = Duration::from_millis(5);

/// Tunables of the video pipeline
#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub max_queued_frames: usize,
    pub preload_frames: usize,
    pub decode_queue_ceiling: usize,
    /// Frames this far below a seek target are still kept
    pub seek_tolerance_secs: f64,
}

impl From<&Config> for VideoSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_queued_frames: config.video.max_queued_frames,
            preload_frames: config.video.preload_frames,
            decode_queue_ceiling: config.video.decode_queue_ceiling,
            seek_tolerance_secs: config.sync.seek_tolerance_secs,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Video pipeline statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct VideoStats {
    pub queued: usize,
    pub high_watermark: usize,
    pub max_depth: usize,
    pub frames_added: u64,
    pub frames_consumed: u64,
    pub frames_flushed: u64,
    /// Released on arrival: below the seek floor or from a flushed decoder
    pub frames_discarded: u64,
    pub frames_overflowed: u64,
    pub chunks_submitted: u64,
    pub chunks_deferred: u64,
    pub chunks_rejected: u64,
    pub rebuilds: u64,
}

#[derive(Default)]
struct VideoFeed {
    stream: Option<ChunkStream>,
    decoder: Option<DecodeController>,
}

/// Video sub-pipeline
#[derive(Clone)]
pub struct VideoPipeline {
    track: VideoTrackInfo,
    settings: VideoSettings,
    backend: Arc<dyn MediaBackend>,
    reporter: SharedReporter,
    queue: Arc<Mutex<FrameQueue>>,
    feed: Arc<tokio::sync::Mutex<VideoFeed>>,
    /// Cancels the open stream without waiting for the feed lock
    cancel: Arc<Mutex<Option<StreamCancel>>>,
    arrivals: Arc<Notify>,
    end_of_stream: Arc<AtomicBool>,
    /// Stream exhausted and nothing left inside the decoder
    drained: Arc<AtomicBool>,
    /// Set by `close`; the feed is never reopened afterwards
    closed: Arc<AtomicBool>,
    decode: Arc<DecodeCounters>,
    rebuilds: Arc<AtomicU64>,
}

impl VideoPipeline {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        track: &VideoTrackInfo,
        settings: VideoSettings,
        reporter: SharedReporter,
    ) -> Self {
        Self {
            track: track.clone(),
            queue: Arc::new(Mutex::new(FrameQueue::new(settings.max_queued_frames))),
            settings,
            backend,
            reporter,
            feed: Arc::new(tokio::sync::Mutex::new(VideoFeed::default())),
            cancel: Arc::new(Mutex::new(None)),
            arrivals: Arc::new(Notify::new()),
            end_of_stream: Arc::new(AtomicBool::new(false)),
            drained: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            decode: Arc::new(DecodeCounters::default()),
            rebuilds: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.track.frame_rate
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    /// Queue the pacer draws from
    pub fn queue(&self) -> &Arc<Mutex<FrameQueue>> {
        &self.queue
    }

    /// Create the decoder and open the chunk stream at `start`
    pub async fn open(&self, start: f64) -> Result<()> {
        let mut feed = self.feed.lock().await;
        self.open_feed(&mut feed, start)
    }

    fn open_feed(&self, feed: &mut VideoFeed, start: f64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::InvalidState("video pipeline is closed".to_string()));
        }
        let generation = self.queue.lock().generation();
        let queue = Arc::downgrade(&self.queue);
        let arrivals = self.arrivals.clone();
        let reporter = self.reporter.clone();
        let output = Arc::new(move |frame: DecodedVideoFrame| {
            let Some(queue) = queue.upgrade() else {
                frame.close();
                return;
            };
            let outcome = queue.lock().push_frame(generation, frame);
            match outcome {
                PushOutcome::Queued => arrivals.notify_waiters(),
                PushOutcome::Overflow => {
                    reporter.report("video-queue", &SyncError::BufferOverflow { requested: 1, available: 0 })
                }
                PushOutcome::BelowFloor | PushOutcome::Stale => {}
            }
        });

        let unit = self.backend.create_video_decoder(DecoderCallbacks {
            output,
            error: self.reporter.clone(),
        })?;
        let mut decoder = DecodeController::new(
            unit,
            self.settings.decode_queue_ceiling,
            "video-decoder",
            self.reporter.clone(),
            self.decode.clone(),
        );
        decoder.configure(&DecoderConfig::for_video(&self.track))?;
        let stream = self.backend.read(TrackKind::Video, start, 0.0, SeekMode::Keyframe)?;

        *self.cancel.lock() = Some(stream.cancel_handle());
        feed.decoder = Some(decoder);
        feed.stream = Some(stream);
        self.end_of_stream.store(false, Ordering::Release);
        self.drained.store(false, Ordering::Release);
        log::debug!("Video feed opened at {:.3}s (generation {})", start, generation);
        Ok(())
    }

    /// Submit chunks until the throttle closes
    ///
    /// Returns the number of chunks forwarded to the decoder.
    pub async fn pump(&self) -> Result<usize> {
        let mut feed = self.feed.lock().await;
        self.pump_feed(&mut feed).await
    }

    /// Spawn one pump unless another is still running
    pub fn spawn_pump(&self) -> bool {
        let Ok(mut feed) = self.feed.clone().try_lock_owned() else {
            return false;
        };
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.pump_feed(&mut feed).await {
                pipeline.reporter.report("video-pipeline", &e);
            }
        });
        true
    }

    async fn pump_feed(&self, feed: &mut VideoFeed) -> Result<usize> {
        let VideoFeed { stream, decoder } = feed;
        let (Some(stream), Some(decoder)) = (stream.as_mut(), decoder.as_mut()) else {
            return Ok(0);
        };

        let mut submitted = 0;
        if decoder.poll_deferred()? == Some(SubmitOutcome::Submitted) {
            submitted += 1;
        }

        loop {
            let queued = self.queue.lock().len();
            if !decoder.ready_for_input() || queued + decoder.outstanding() >= self.settings.max_queued_frames {
                break;
            }
            match stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    if decoder.submit(chunk)? == SubmitOutcome::Submitted {
                        submitted += 1;
                    }
                }
                Ok(None) => {
                    if !self.end_of_stream.swap(true, Ordering::AcqRel) {
                        log::debug!("Video stream exhausted");
                    }
                    break;
                }
                Err(e) => {
                    self.reporter.report("video-source", &e);
                    break;
                }
            }
        }

        let drained = self.end_of_stream.load(Ordering::Acquire) && decoder.outstanding() == 0;
        self.drained.store(drained, Ordering::Release);
        Ok(submitted)
    }

    /// Pump until `frames` frames are queued or the stream is drained
    ///
    /// Gives up after `timeout` and returns whatever is queued by then.
    pub async fn preload(&self, frames: usize, timeout: Duration) -> Result<usize> {
        let target = frames.min(self.settings.max_queued_frames);
        let fill = async {
            loop {
                self.pump().await?;
                let queued = self.queue.lock().len();
                if queued >= target || self.is_drained() {
                    return Ok::<usize, SyncError>(queued);
                }
                tokio::select! {
                    _ = self.arrivals.notified() => {}
                    _ = tokio::time::sleep(ARRIVAL_POLL) => {}
                }
            }
        };

        match tokio::time::timeout(timeout, fill).await {
            Ok(result) => {
                let queued = result?;
                log::debug!("Video preloaded {} frames", queued);
                Ok(queued)
            }
            Err(_) => {
                let queued = self.queue.lock().len();
                log::warn!("Video preload timed out after {:?} with {} frames", timeout, queued);
                Ok(queued)
            }
        }
    }

    /// Tear down and reopen at `position`, discarding frames below it
    ///
    /// Returns the number of queued frames released.
    pub async fn restart_at(&self, position: f64) -> Result<usize> {
        self.cancel_stream();
        let mut feed = self.feed.lock().await;
        Self::close_feed(&mut feed);

        let released = {
            let mut queue = self.queue.lock();
            let released = queue.flush();
            queue.set_floor(Some(secs_to_micros(position - self.settings.seek_tolerance_secs)));
            released
        };
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        log::debug!("Video pipeline torn down, {} queued frames released", released);

        self.open_feed(&mut feed, position)?;
        Ok(released)
    }

    fn cancel_stream(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
    }

    fn close_feed(feed: &mut VideoFeed) {
        if let Some(mut stream) = feed.stream.take() {
            stream.cancel();
        }
        if let Some(mut decoder) = feed.decoder.take() {
            decoder.close();
        }
    }

    /// Cancel the stream, close the decoder and release every queued frame
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel_stream();
        let mut feed = self.feed.lock().await;
        Self::close_feed(&mut feed);
        let released = self.queue.lock().flush();
        log::debug!("Video pipeline closed, {} queued frames released", released);
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }

    /// Stream exhausted and the decoder empty as of the last pump
    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> VideoStats {
        let queue = self.queue.lock();
        let q = queue.stats();
        let decode = self.decode.snapshot();
        VideoStats {
            queued: queue.len(),
            high_watermark: queue.high_watermark(),
            max_depth: q.max_depth,
            frames_added: q.frames_added,
            frames_consumed: q.frames_consumed,
            frames_flushed: q.frames_flushed,
            frames_discarded: q.frames_discarded,
            frames_overflowed: q.frames_overflowed,
            chunks_submitted: decode.submitted,
            chunks_deferred: decode.deferred,
            chunks_rejected: decode.rejected,
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }
}
