//! Ring-buffered audio pipeline
//!
//! Pulls compressed audio from the chunk source, pushes it through the
//! decode controller, and writes every decoded block into the sample ring.
//!
//! Fill scheduling:
//! - one fill runs at a time; requests arriving meanwhile coalesce into a
//!   single follow-up pass
//! - fill stops once the ring holds the decode target (0.3 s by default)
//!   or the decoder is saturated, in which case decoder output re-triggers it
//! - at target, a one-shot ready signal resolves and, while playing, a
//!   timer refills after half the buffered duration

use crate::audio::{sample_ring, AudioClock, AudioFormat, RingMonitor, SampleConsumer, SampleProducer, VolumeHandle, VolumeRamp};
use crate::decoder::{
    AudioTrackInfo, ChunkStream, DecodeController, DecodeCounters, DecodedAudioBlock, DecoderCallbacks, DecoderConfig,
    MediaBackend, SeekMode, TrackKind,
};
use crate::utils::config::AudioConfig;
use crate::utils::error::{Result, SyncError};
use crate::utils::{ReadySignal, SharedReporter};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tunables of the audio pipeline
#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Buffered seconds at which fill stops and readiness fires
    pub decode_target_secs: f64,
    /// Ring capacity in seconds
    pub buffer_secs: f64,
    /// Decoder ceiling
    pub decode_queue_ceiling: usize,
    /// Initial volume
    pub volume: f32,
    /// Volume ramp time constant
    pub volume_ramp_secs: f32,
}

impl From<&AudioConfig> for AudioSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            decode_target_secs: config.decode_target_secs,
            buffer_secs: config.buffer_secs,
            decode_queue_ceiling: config.decode_queue_ceiling,
            volume: config.volume,
            volume_ramp_secs: config.volume_ramp_secs,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

/// Audio pipeline statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioStats {
    /// Playable seconds in the ring
    pub buffered_secs: f64,
    /// Ring occupancy in percent
    pub buffer_health: f64,
    /// Decoded blocks written to the ring
    pub blocks_buffered: u64,
    /// Blocks that did not fit completely
    pub overflow_events: u64,
    /// Samples dropped by overflows
    pub dropped_samples: u64,
    /// Device callbacks that ran dry
    pub underruns: u64,
    /// Fill passes executed
    pub fills_run: u64,
    /// Fill requests folded into a running pass
    pub fills_coalesced: u64,
    /// Ready signal resolutions across all epochs
    pub ready_resolutions: u64,
    /// Chunks forwarded to the decoder
    pub chunks_submitted: u64,
    /// Chunks parked at the decode ceiling
    pub chunks_deferred: u64,
    /// Chunks the decoder rejected
    pub chunks_rejected: u64,
}

#[derive(Default)]
struct AudioCounters {
    blocks_buffered: AtomicU64,
    overflow_events: AtomicU64,
    fills_run: AtomicU64,
    fills_coalesced: AtomicU64,
}

/// Producer-side state touched by decoder output
struct AudioWriter {
    producer: SampleProducer,
    /// Per-channel conversion scratch
    planes: Vec<Vec<f32>>,
    /// Bumped on seek; output from older decoders is dropped
    generation: u64,
}

#[derive(Default)]
struct AudioFeed {
    stream: Option<ChunkStream>,
    decoder: Option<DecodeController>,
}

struct AudioShared {
    format: AudioFormat,
    track: AudioTrackInfo,
    settings: AudioSettings,
    backend: Arc<dyn MediaBackend>,
    reporter: SharedReporter,
    writer: Mutex<AudioWriter>,
    monitor: RingMonitor,
    consumer: Mutex<Option<SampleConsumer>>,
    feed: tokio::sync::Mutex<AudioFeed>,
    fill_in_progress: AtomicBool,
    fill_requested: AtomicBool,
    refill_armed: AtomicBool,
    playing: AtomicBool,
    end_of_stream: AtomicBool,
    closed: AtomicBool,
    ready: ReadySignal,
    clock: Arc<AudioClock>,
    volume: VolumeHandle,
    counters: AudioCounters,
    decode: Arc<DecodeCounters>,
}

/// Clears the fill flag however the pass ends
struct FillGuard<'a>(&'a AtomicBool);

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Audio sub-pipeline: chunk stream, decoder, ring producer and clock
#[derive(Clone)]
pub struct AudioPipeline {
    shared: Arc<AudioShared>,
}

impl AudioPipeline {
    /// Build the pipeline and its ring for `track`
    ///
    /// The ring consumer is kept until [`take_consumer`](Self::take_consumer)
    /// hands it to the audio sink.
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        track: &AudioTrackInfo,
        settings: AudioSettings,
        reporter: SharedReporter,
    ) -> Result<Self> {
        if track.sample_rate == 0 || track.channels == 0 {
            return Err(SyncError::Configuration(format!(
                "Unusable audio track: {} Hz, {} channels",
                track.sample_rate, track.channels
            )));
        }

        let format = AudioFormat {
            sample_rate: track.sample_rate,
            channels: usize::from(track.channels),
        };
        let (producer, mut consumer) = sample_ring(format, format.frames_for(settings.buffer_secs));
        let clock = Arc::new(AudioClock::new(format.sample_rate));
        let volume = VolumeHandle::new(settings.volume);
        consumer.attach_clock(clock.clone());
        consumer.attach_volume(VolumeRamp::new(
            volume.clone(),
            format.sample_rate,
            format.channels,
            settings.volume_ramp_secs,
        ));

        log::debug!(
            "Audio ring: {} samples ({:.2}s at {} Hz x {})",
            producer.capacity(),
            settings.buffer_secs,
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            shared: Arc::new(AudioShared {
                format,
                track: track.clone(),
                settings,
                backend,
                reporter,
                monitor: producer.monitor(),
                writer: Mutex::new(AudioWriter {
                    producer,
                    planes: vec![Vec::new(); format.channels],
                    generation: 0,
                }),
                consumer: Mutex::new(Some(consumer)),
                feed: tokio::sync::Mutex::new(AudioFeed::default()),
                fill_in_progress: AtomicBool::new(false),
                fill_requested: AtomicBool::new(false),
                refill_armed: AtomicBool::new(false),
                playing: AtomicBool::new(false),
                end_of_stream: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                ready: ReadySignal::new(),
                clock,
                volume,
                counters: AudioCounters::default(),
                decode: Arc::new(DecodeCounters::default()),
            }),
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    /// Hand the ring consumer to the rendering context; succeeds once
    pub fn take_consumer(&self) -> Result<SampleConsumer> {
        self.shared
            .consumer
            .lock()
            .take()
            .ok_or_else(|| SyncError::InvalidState("audio ring consumer already attached".to_string()))
    }

    /// Create the decoder and open the chunk stream at `start`
    pub async fn open(&self, start: f64) -> Result<()> {
        let mut feed = self.shared.feed.lock().await;
        self.open_feed(&mut feed, start)
    }

    fn open_feed(&self, feed: &mut AudioFeed, start: f64) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SyncError::InvalidState("audio pipeline is closed".to_string()));
        }
        if let Some(mut stream) = feed.stream.take() {
            stream.cancel();
        }
        if let Some(mut decoder) = feed.decoder.take() {
            decoder.close();
        }

        let generation = self.shared.writer.lock().generation;
        let weak = Arc::downgrade(&self.shared);
        let output = Arc::new(move |block: DecodedAudioBlock| match weak.upgrade() {
            Some(shared) => AudioPipeline { shared }.buffer_audio_data(generation, block),
            None => block.close(),
        });

        let unit = self.shared.backend.create_audio_decoder(DecoderCallbacks {
            output,
            error: self.shared.reporter.clone(),
        })?;
        let mut decoder = DecodeController::new(
            unit,
            self.shared.settings.decode_queue_ceiling,
            "audio-decoder",
            self.shared.reporter.clone(),
            self.shared.decode.clone(),
        );
        decoder.configure(&DecoderConfig::for_audio(&self.shared.track))?;
        let stream = self.shared.backend.read(TrackKind::Audio, start, 0.0, SeekMode::Any)?;

        feed.decoder = Some(decoder);
        feed.stream = Some(stream);
        self.shared.end_of_stream.store(false, Ordering::Release);
        log::debug!("Audio feed opened at {:.3}s (generation {})", start, generation);
        Ok(())
    }

    /// Schedule a fill pass without waiting for it
    pub fn request_fill(&self) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pipeline = self.clone();
                runtime.spawn(async move {
                    pipeline.fill().await;
                });
            }
            Err(_) => log::trace!("No runtime to schedule audio fill"),
        }
    }

    /// Run a fill pass unless one is already running
    ///
    /// Returns `false` when the request was folded into the running pass.
    pub async fn fill(&self) -> bool {
        let shared = &self.shared;
        shared.fill_requested.store(true, Ordering::SeqCst);
        if shared
            .fill_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            shared.counters.fills_coalesced.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        loop {
            {
                let _guard = FillGuard(&shared.fill_in_progress);
                shared.fill_requested.store(false, Ordering::SeqCst);
                shared.counters.fills_run.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.fill_internal().await {
                    shared.reporter.report("audio-pipeline", &e);
                }
            }

            // A request that arrived mid-pass gets one follow-up pass
            if !shared.fill_requested.load(Ordering::SeqCst)
                || shared
                    .fill_in_progress
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
        true
    }

    async fn fill_internal(&self) -> Result<()> {
        let shared = &self.shared;
        let target = shared.settings.decode_target_secs;
        let mut feed = shared.feed.lock().await;
        let AudioFeed { stream, decoder } = &mut *feed;
        let (Some(stream), Some(decoder)) = (stream.as_mut(), decoder.as_mut()) else {
            return Ok(());
        };

        decoder.poll_deferred()?;
        if !decoder.ready_for_input() {
            log::trace!("Audio decoder saturated, waiting for output");
            return Ok(());
        }

        let mut used = self.buffered_secs();
        if used >= target {
            self.schedule_refill(used / 2.0);
            if shared.ready.resolve() {
                log::info!("Audio buffer ready ({:.3}s buffered)", used);
            }
            return Ok(());
        }

        while used < target && decoder.ready_for_input() {
            match stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    decoder.submit(chunk)?;
                }
                Ok(None) => {
                    if !shared.end_of_stream.swap(true, Ordering::AcqRel) {
                        log::debug!("Audio stream exhausted");
                    }
                    break;
                }
                Err(e) => {
                    shared.reporter.report("audio-source", &e);
                    break;
                }
            }
            used = self.buffered_secs();
        }

        // Short media never reaches the target; everything buffered is all there is
        if shared.end_of_stream.load(Ordering::Acquire) && decoder.outstanding() == 0 && shared.ready.resolve() {
            log::info!("Audio ready at end of stream ({:.3}s buffered)", self.buffered_secs());
        }
        Ok(())
    }

    fn schedule_refill(&self, delay_secs: f64) {
        let shared = &self.shared;
        if !shared.playing.load(Ordering::Acquire)
            || shared.refill_armed.swap(true, Ordering::AcqRel)
        {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            shared.refill_armed.store(false, Ordering::Release);
            return;
        };

        let pipeline = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(delay_secs.max(0.001))).await;
            pipeline.shared.refill_armed.store(false, Ordering::Release);
            if !pipeline.shared.closed.load(Ordering::Acquire) {
                pipeline.fill().await;
            }
        });
    }

    /// Decoder output: convert to planar f32 and interleave into the ring
    fn buffer_audio_data(&self, generation: u64, block: DecodedAudioBlock) {
        let shared = &self.shared;
        let channels = shared.format.channels;
        let frames = block.frames;

        let written = {
            let mut writer = shared.writer.lock();
            if writer.generation != generation {
                log::trace!("Dropping audio block {} from flushed generation", block.pts);
                return;
            }
            if block.channels != channels {
                drop(writer);
                shared.reporter.report(
                    "audio-pipeline",
                    &SyncError::decode_error(format!(
                        "block has {} channels, stream has {}",
                        block.channels, channels
                    )),
                );
                return;
            }

            let AudioWriter { producer, planes, .. } = &mut *writer;
            for (channel, plane) in planes.iter_mut().enumerate() {
                if plane.len() < frames {
                    plane.resize(frames * 2, 0.0);
                }
                if let Err(e) = block.copy_channel_to(channel, plane) {
                    shared.reporter.report("audio-pipeline", &e);
                    return;
                }
            }
            let views: Vec<&[f32]> = planes.iter().map(|p| &p[..frames]).collect();
            producer.write_interleaved(&views, frames)
        };
        block.close();
        shared.counters.blocks_buffered.fetch_add(1, Ordering::Relaxed);

        let requested = frames * channels;
        if written != requested {
            shared.counters.overflow_events.fetch_add(1, Ordering::Relaxed);
            shared.reporter.report(
                "audio-ring",
                &SyncError::BufferOverflow { requested, available: written },
            );
        }

        self.request_fill();
    }

    /// Per-tick consumer check: top up when below target
    pub fn tick(&self) {
        if self.is_playing()
            && !self.shared.fill_in_progress.load(Ordering::Acquire)
            && self.buffered_secs() < self.shared.settings.decode_target_secs
        {
            self.request_fill();
        }
    }

    /// Start consuming: the sink stops rendering silence
    pub fn play(&self) {
        self.shared.playing.store(true, Ordering::Release);
        self.shared.clock.set_playing(true);
        self.request_fill();
    }

    /// Stop consuming; the ring keeps its contents
    pub fn pause(&self) {
        self.shared.playing.store(false, Ordering::Release);
        self.shared.clock.set_playing(false);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    /// Wait until the ring first reaches the decode target in this epoch
    pub async fn wait_ready(&self) {
        self.shared.ready.wait().await;
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.is_ready()
    }

    /// Discard buffered audio and restart decoding at `position`
    ///
    /// Leaves the pipeline paused with the ready signal re-armed.
    pub async fn seek(&self, position: f64) -> Result<()> {
        self.pause();
        let mut feed = self.shared.feed.lock().await;
        {
            let mut writer = self.shared.writer.lock();
            writer.generation += 1;
            writer.producer.request_flush();
        }
        self.shared.ready.rearm();
        self.shared.clock.set_position(position);
        self.open_feed(&mut feed, position)?;
        drop(feed);

        self.request_fill();
        Ok(())
    }

    /// Cancel the stream, close the decoder and drop buffered audio
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.pause();
        let mut feed = self.shared.feed.lock().await;
        if let Some(mut stream) = feed.stream.take() {
            stream.cancel();
        }
        if let Some(mut decoder) = feed.decoder.take() {
            decoder.close();
        }
        let mut writer = self.shared.writer.lock();
        writer.generation += 1;
        writer.producer.request_flush();
        log::debug!("Audio pipeline closed");
    }

    /// Audio clock position in seconds
    pub fn position(&self) -> f64 {
        self.shared.clock.position()
    }

    pub fn clock(&self) -> Arc<AudioClock> {
        self.shared.clock.clone()
    }

    /// Playable seconds in the ring
    pub fn buffered_secs(&self) -> f64 {
        self.shared.monitor.fresh_secs()
    }

    /// Ring occupancy in percent
    pub fn buffer_health(&self) -> f64 {
        self.shared.monitor.health()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume.get()
    }

    /// The chunk stream has been read to its end
    pub fn is_end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AudioStats {
        let ring = self.shared.monitor.stats();
        let counters = &self.shared.counters;
        let decode = self.shared.decode.snapshot();
        AudioStats {
            buffered_secs: self.buffered_secs(),
            buffer_health: self.buffer_health(),
            blocks_buffered: counters.blocks_buffered.load(Ordering::Relaxed),
            overflow_events: counters.overflow_events.load(Ordering::Relaxed),
            dropped_samples: ring.dropped_samples,
            underruns: ring.underruns,
            fills_run: counters.fills_run.load(Ordering::Relaxed),
            fills_coalesced: counters.fills_coalesced.load(Ordering::Relaxed),
            ready_resolutions: self.shared.ready.resolution_count(),
            chunks_submitted: decode.submitted,
            chunks_deferred: decode.deferred,
            chunks_rejected: decode.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::synthetic::{SyntheticConfig, SyntheticMedia};
    use crate::utils::{log_reporter, ErrorReporter};

    fn pipeline(config: SyntheticConfig) -> AudioPipeline {
        let media = Arc::new(SyntheticMedia::new(config));
        let track = media.media_info().unwrap().audio.unwrap();
        AudioPipeline::new(media, &track, AudioSettings::default(), log_reporter()).unwrap()
    }

    /// Keeps `(component, error)` pairs
    #[derive(Default)]
    struct CapturingReporter(Mutex<Vec<(String, String)>>);

    impl CapturingReporter {
        fn overflows(&self) -> usize {
            self.0
                .lock()
                .iter()
                .filter(|(component, message)| component == "audio-ring" && message.starts_with("Buffer overflow"))
                .count()
        }
    }

    impl ErrorReporter for CapturingReporter {
        fn report(&self, component: &str, error: &SyncError) {
            self.0.lock().push((component.to_string(), error.to_string()));
        }
    }

    async fn settle(pipeline: &AudioPipeline) {
        for _ in 0..200 {
            if pipeline.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_fills_to_target_and_signals_ready() {
        let pipeline = pipeline(SyntheticConfig::default());
        pipeline.open(0.0).await.unwrap();
        pipeline.fill().await;

        tokio::time::timeout(Duration::from_secs(2), pipeline.wait_ready())
            .await
            .expect("audio should become ready");

        let stats = pipeline.stats();
        assert!(stats.buffered_secs >= 0.3);
        assert!(stats.buffered_secs <= 0.6);
        assert_eq!(stats.overflow_events, 0);
    }

    #[tokio::test]
    async fn test_ready_fires_once_under_concurrent_fill() {
        let pipeline = pipeline(SyntheticConfig::default());
        pipeline.open(0.0).await.unwrap();

        let mut coalesced = false;
        for _ in 0..100 {
            let (a, b) = tokio::join!(pipeline.fill(), pipeline.fill());
            coalesced |= !(a && b);
            if pipeline.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(pipeline.is_ready());
        assert!(coalesced);

        for _ in 0..5 {
            tokio::join!(pipeline.fill(), pipeline.fill());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pipeline.stats().ready_resolutions, 1);
    }

    #[tokio::test]
    async fn test_seek_flushes_and_rearms() {
        let pipeline = pipeline(SyntheticConfig::default());
        let mut consumer = pipeline.take_consumer().unwrap();
        pipeline.open(0.0).await.unwrap();
        pipeline.fill().await;
        settle(&pipeline).await;
        assert!(pipeline.is_ready());

        pipeline.seek(12.0).await.unwrap();
        assert!(!pipeline.is_playing());
        assert_eq!(pipeline.position(), 12.0);

        // The sink keeps rendering (silence) while paused, which services the discard
        let mut scratch = vec![0.0; 512];
        for _ in 0..200 {
            consumer.render(&mut scratch);
            if pipeline.is_ready() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(pipeline.is_ready());
        assert_eq!(pipeline.stats().ready_resolutions, 2);

        pipeline.play();
        consumer.render(&mut scratch);
        assert!(pipeline.position() > 12.0);
    }

    #[tokio::test]
    async fn test_short_media_becomes_ready_at_end_of_stream() {
        let pipeline = pipeline(SyntheticConfig {
            duration: Duration::from_millis(100),
            ..Default::default()
        });
        pipeline.open(0.0).await.unwrap();
        pipeline.fill().await;

        tokio::time::timeout(Duration::from_secs(2), pipeline.wait_ready())
            .await
            .expect("short media should still become ready");
        assert!(pipeline.is_end_of_stream());
        assert!(pipeline.buffered_secs() < 0.3);
    }

    #[tokio::test]
    async fn test_undrained_ring_overflows_and_reports() {
        let media = Arc::new(SyntheticMedia::new(SyntheticConfig {
            duration: Duration::from_secs(1),
            ..Default::default()
        }));
        let track = media.media_info().unwrap().audio.unwrap();
        let reporter = Arc::new(CapturingReporter::default());
        // A ring smaller than the decode target can never satisfy fill
        let settings = AudioSettings {
            buffer_secs: 0.05,
            ..AudioSettings::default()
        };
        let pipeline = AudioPipeline::new(media, &track, settings, reporter.clone()).unwrap();
        let _consumer = pipeline.take_consumer().unwrap();
        pipeline.open(0.0).await.unwrap();
        pipeline.fill().await;

        for _ in 0..400 {
            if reporter.overflows() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = pipeline.stats();
        assert!(reporter.overflows() > 0);
        assert!(stats.overflow_events > 0);
        assert!(stats.dropped_samples > 0);
        assert!(stats.buffered_secs <= 0.05 + 1e-9);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn test_closed_pipeline_is_not_reopened_by_seek() {
        let media = Arc::new(SyntheticMedia::new(SyntheticConfig::default()));
        let track = media.media_info().unwrap().audio.unwrap();
        let pipeline = AudioPipeline::new(media.clone(), &track, AudioSettings::default(), log_reporter()).unwrap();
        pipeline.open(0.0).await.unwrap();
        pipeline.close().await;
        let opened = (media.streams_opened(), media.decoders_created());

        let err = pipeline.seek(10.0).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
        assert!(matches!(pipeline.open(0.0).await, Err(SyncError::InvalidState(_))));
        assert_eq!((media.streams_opened(), media.decoders_created()), opened);
    }

    #[tokio::test]
    async fn test_consumer_handed_out_once() {
        let pipeline = pipeline(SyntheticConfig::default());
        assert!(pipeline.take_consumer().is_ok());
        assert!(matches!(pipeline.take_consumer(), Err(SyncError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_close_drops_buffered_audio() {
        let pipeline = pipeline(SyntheticConfig::default());
        let mut consumer = pipeline.take_consumer().unwrap();
        pipeline.open(0.0).await.unwrap();
        pipeline.fill().await;
        settle(&pipeline).await;

        pipeline.close().await;
        assert_eq!(pipeline.buffered_secs(), 0.0);
        let mut scratch = vec![1.0; 64];
        assert_eq!(consumer.render(&mut scratch), 0);
        pipeline.fill().await;
        assert_eq!(pipeline.buffered_secs(), 0.0);
    }
}
