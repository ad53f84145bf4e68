//! Integration test utilities for syncplay
//!
//! This module provides common utilities for integration testing including:
//! - A harness that wires synthetic media into a controller
//! - Recording reporters and event handlers
//! - A backend that corrupts one video chunk

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncplay::audio::AudioSink;
use syncplay::decoder::synthetic::{SyntheticConfig, SyntheticMedia};
use syncplay::decoder::{
    ChunkStream, DecodeUnit, DecodedAudioBlock, DecodedVideoFrame, DecoderCallbacks, MediaBackend, MediaInfo,
    SeekMode, TrackKind,
};
use syncplay::renderer::{RecordingHandle, RecordingSink};
use syncplay::utils::{ErrorReporter, SyncError};
use syncplay::{Config, SyncController, SyncEvent, SyncEventHandler, SyncState};

/// Route engine logs through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Short stream used by most suites
pub fn short_media(seconds: u64) -> SyntheticConfig {
    SyntheticConfig {
        duration: Duration::from_secs(seconds),
        ..Default::default()
    }
}

/// Reporter that keeps every error it receives
#[derive(Default)]
pub struct CountingReporter {
    entries: Mutex<Vec<(String, String)>>,
    decode_errors: Mutex<usize>,
}

impl CountingReporter {
    /// `(component, message)` pairs in arrival order
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }

    pub fn decode_errors(&self) -> usize {
        *self.decode_errors.lock()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl ErrorReporter for CountingReporter {
    fn report(&self, component: &str, error: &SyncError) {
        if matches!(error, SyncError::Decode(_)) {
            *self.decode_errors.lock() += 1;
        }
        self.entries.lock().push((component.to_string(), error.to_string()));
    }
}

/// Event handler that records every event
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }

    /// States entered, in order
    pub fn states(&self) -> Vec<SyncState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SyncEvent::StateChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl SyncEventHandler for RecordingEvents {
    fn handle_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Backend that replaces the payload of one video chunk with garbage
///
/// Only streams opened at the start of the media are affected, so the
/// corrupted chunk is the one with `sequence == corrupt_sequence`.
pub struct FaultInjectingBackend {
    media: Arc<SyntheticMedia>,
    corrupt_sequence: u64,
}

impl FaultInjectingBackend {
    pub fn new(media: Arc<SyntheticMedia>, corrupt_sequence: u64) -> Self {
        Self { media, corrupt_sequence }
    }
}

impl MediaBackend for FaultInjectingBackend {
    fn media_info(&self) -> syncplay::Result<MediaInfo> {
        self.media.media_info()
    }

    fn read(&self, track: TrackKind, start: f64, end: f64, mode: SeekMode) -> syncplay::Result<ChunkStream> {
        let mut inner = self.media.read(track, start, end, mode)?;
        if track != TrackKind::Video || start > 0.0 {
            return Ok(inner);
        }

        let corrupt = self.corrupt_sequence;
        let (sender, mut stream) = ChunkStream::channel(track, 4);
        let producer = tokio::spawn(async move {
            loop {
                match inner.next_chunk().await {
                    Ok(Some(mut chunk)) => {
                        if chunk.sequence == corrupt {
                            chunk.payload = vec![0xde, 0xad];
                        }
                        if !sender.send(chunk).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        sender.fail(e).await;
                        break;
                    }
                }
            }
        });
        stream.attach_producer(producer);
        Ok(stream)
    }

    fn create_video_decoder(
        &self,
        callbacks: DecoderCallbacks<DecodedVideoFrame>,
    ) -> syncplay::Result<Box<dyn DecodeUnit>> {
        self.media.create_video_decoder(callbacks)
    }

    fn create_audio_decoder(
        &self,
        callbacks: DecoderCallbacks<DecodedAudioBlock>,
    ) -> syncplay::Result<Box<dyn DecodeUnit>> {
        self.media.create_audio_decoder(callbacks)
    }
}

/// Controller wired to synthetic media, a recording pixel sink and recorders
pub struct Harness {
    pub controller: SyncController,
    pub media: Arc<SyntheticMedia>,
    pub frames: RecordingHandle,
    pub reporter: Arc<CountingReporter>,
    pub events: Arc<RecordingEvents>,
}

impl Harness {
    /// Harness over plain synthetic media with the real-time audio sink
    pub fn new(media: SyntheticConfig) -> Result<Self> {
        let media = Arc::new(SyntheticMedia::new(media));
        Self::with_backend(media.clone(), media, None)
    }

    /// Harness over `backend`, whose frames come from `media`'s pool
    pub fn with_backend(
        backend: Arc<dyn MediaBackend>,
        media: Arc<SyntheticMedia>,
        audio_sink: Option<Box<dyn AudioSink>>,
    ) -> Result<Self> {
        init_logging();
        let (pixel_sink, frames) = RecordingSink::new(640, 360);
        let reporter = Arc::new(CountingReporter::default());
        let events = Arc::new(RecordingEvents::default());

        let mut builder = SyncController::builder()
            .with_backend(backend)
            .with_config(Config::default())
            .with_pixel_sink(Box::new(pixel_sink))
            .with_reporter(reporter.clone())
            .with_event_handler(events.clone());
        if let Some(sink) = audio_sink {
            builder = builder.with_audio_sink(sink);
        }

        Ok(Self {
            controller: builder.build()?,
            media,
            frames,
            reporter,
            events,
        })
    }

    /// Init and start playback
    pub async fn start(&self) -> Result<()> {
        self.controller.init().await?;
        self.controller.play_when_ready().await?;
        Ok(())
    }

    /// Wait until at least `count` frames were presented
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.frames.len() < count {
            if Instant::now() >= deadline {
                bail!("only {} of {} frames presented after {:?}", self.frames.len(), count, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Wait until the presentation passes `pts` microseconds
    pub async fn wait_for_pts(&self, pts: i64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.frames.last().map(|frame| frame.pts >= pts).unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("presentation did not reach {} us after {:?}", pts, timeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
