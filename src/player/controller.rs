//! Synchronization controller
//!
//! Owns the media backend, both sub-pipelines, the playback clock and the
//! frame pacer, and drives the render loop. Every path that ends playback
//! (explicit stop, failed setup, failed seek) converges on one release
//! sequence, which runs once.

use crate::audio::{AudioFormat, AudioPipeline, AudioSettings, AudioSink, RealtimeSink};
use crate::decoder::{MediaBackend, MediaInfo};
use crate::player::{
    FramePacer, PlaybackClock, PlaybackStats, StateMachine, SyncEvent, SyncEventHandler, SyncState, VideoPipeline,
    VideoSettings,
};
use crate::renderer::PixelSink;
use crate::utils::config::Config;
use crate::utils::error::{ErrorReporter, Result, SharedReporter, SyncError};
use crate::utils::log_reporter;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Builds the audio sink once the audio format is known
pub type SinkFactory = Box<dyn FnOnce(AudioFormat) -> Result<Box<dyn AudioSink>> + Send>;

type Handlers = Arc<RwLock<Vec<Arc<dyn SyncEventHandler>>>>;

/// Builder for [`SyncController`]
pub struct SyncControllerBuilder {
    config: Config,
    backend: Option<Arc<dyn MediaBackend>>,
    sink_factory: Option<SinkFactory>,
    pixel_sink: Option<Box<dyn PixelSink>>,
    reporter: SharedReporter,
    handlers: Vec<Arc<dyn SyncEventHandler>>,
}

impl SyncControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            backend: None,
            sink_factory: None,
            pixel_sink: None,
            reporter: log_reporter(),
            handlers: Vec::new(),
        }
    }

    /// Source of media info, chunk streams and decoders
    pub fn with_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use an already constructed audio sink
    pub fn with_audio_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        let factory: SinkFactory = Box::new(move |_format: AudioFormat| Ok::<_, SyncError>(sink));
        self.sink_factory = Some(factory);
        self
    }

    /// Construct the audio sink for the track's format during `init`
    pub fn with_audio_sink_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(AudioFormat) -> Result<Box<dyn AudioSink>> + Send + 'static,
    {
        let factory: SinkFactory = Box::new(factory);
        self.sink_factory = Some(factory);
        self
    }

    pub fn with_pixel_sink(mut self, sink: Box<dyn PixelSink>) -> Self {
        self.pixel_sink = Some(sink);
        self
    }

    /// Receives errors the pipelines recover from
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn SyncEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<SyncController> {
        let backend = self
            .backend
            .ok_or_else(|| SyncError::Configuration("a media backend is required".to_string()))?;
        self.config.validate()?;

        let sink_factory = match self.sink_factory {
            Some(factory) => factory,
            None => realtime_sink_factory(Duration::from_millis(self.config.audio.sink_period_ms)),
        };

        let handlers: Handlers = Arc::new(RwLock::new(self.handlers));
        let reporter: SharedReporter = Arc::new(EventReporter {
            inner: self.reporter,
            handlers: handlers.clone(),
        });

        Ok(SyncController {
            inner: Arc::new(Inner {
                config: self.config,
                backend,
                reporter,
                handlers,
                state: StateMachine::new(),
                media_info: OnceCell::new(),
                pipelines: OnceCell::new(),
                sink_factory: Mutex::new(Some(sink_factory)),
                audio_sink: Mutex::new(None),
                pixel_sink: Mutex::new(self.pixel_sink),
                pacer: Mutex::new(None),
                clock: Mutex::new(None),
                tick_gate: RwLock::new(()),
                seek_lock: tokio::sync::Mutex::new(()),
                render_task: Mutex::new(None),
                released: AtomicBool::new(false),
                eos_emitted: AtomicBool::new(false),
                seeks_completed: AtomicU64::new(0),
                ticks: AtomicU64::new(0),
            }),
        })
    }
}

impl Default for SyncControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn realtime_sink_factory(period: Duration) -> SinkFactory {
    Box::new(move |format: AudioFormat| {
        let sink: Box<dyn AudioSink> = Box::new(RealtimeSink::new(format, period));
        Ok::<_, SyncError>(sink)
    })
}

/// Forwards to the caller's reporter and raises [`SyncEvent::Error`]
struct EventReporter {
    inner: SharedReporter,
    handlers: Handlers,
}

impl ErrorReporter for EventReporter {
    fn report(&self, component: &str, error: &SyncError) {
        self.inner.report(component, error);
        dispatch(
            &self.handlers,
            &SyncEvent::Error {
                component: component.to_string(),
                message: error.to_string(),
            },
        );
    }
}

fn dispatch(handlers: &Handlers, event: &SyncEvent) {
    for handler in handlers.read().iter() {
        handler.handle_event(event);
    }
}

pub(super) struct Pipelines {
    pub(super) video: VideoPipeline,
    pub(super) audio: AudioPipeline,
}

pub(super) struct Inner {
    pub(super) config: Config,
    backend: Arc<dyn MediaBackend>,
    pub(super) reporter: SharedReporter,
    handlers: Handlers,
    pub(super) state: StateMachine,
    pub(super) media_info: OnceCell<MediaInfo>,
    pub(super) pipelines: OnceCell<Pipelines>,
    sink_factory: Mutex<Option<SinkFactory>>,
    audio_sink: Mutex<Option<Box<dyn AudioSink>>>,
    pixel_sink: Mutex<Option<Box<dyn PixelSink>>>,
    pub(super) pacer: Mutex<Option<FramePacer>>,
    pub(super) clock: Mutex<Option<PlaybackClock>>,
    /// Held for reading by a tick, for writing while the state changes
    pub(super) tick_gate: RwLock<()>,
    /// Sequences seeks
    pub(super) seek_lock: tokio::sync::Mutex<()>,
    render_task: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
    pub(super) eos_emitted: AtomicBool,
    pub(super) seeks_completed: AtomicU64,
    ticks: AtomicU64,
}

impl Inner {
    pub(super) fn emit(&self, event: SyncEvent) {
        log::debug!("Event: {:?}", event);
        dispatch(&self.handlers, &event);
    }

    pub(super) fn pipelines(&self) -> Result<&Pipelines> {
        self.pipelines
            .get()
            .ok_or_else(|| SyncError::not_ready("pipelines are not initialized"))
    }

    /// One render loop iteration: clock, pacer, audio top-up, video refill
    fn tick(&self) {
        let _gate = self.tick_gate.read();
        if self.state.current() != SyncState::Playing {
            return;
        }
        let Some(pipelines) = self.pipelines.get() else {
            return;
        };
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let position = self.clock.lock().as_mut().and_then(|clock| clock.tick(Instant::now()));
        if let Some(position) = position {
            if let Err(e) = self.render(position, pipelines) {
                self.reporter.report("frame-pacer", &e);
            }
        }

        pipelines.audio.tick();
        pipelines.video.spawn_pump();
        self.check_end_of_stream(pipelines);
    }

    fn render(&self, position: f64, pipelines: &Pipelines) -> Result<()> {
        let mut pacer = self.pacer.lock();
        let mut sink = self.pixel_sink.lock();
        if let (Some(pacer), Some(sink)) = (pacer.as_mut(), sink.as_mut()) {
            let mut queue = pipelines.video.queue().lock();
            pacer.tick_render(position, &mut queue, &mut **sink)?;
        }
        Ok(())
    }

    fn check_end_of_stream(&self, pipelines: &Pipelines) {
        let finished =
            pipelines.video.is_drained() && pipelines.video.queued() == 0 && pipelines.audio.is_end_of_stream();
        if finished && !self.eos_emitted.swap(true, Ordering::AcqRel) {
            log::info!("End of stream reached at {:.3}s", pipelines.audio.position());
            self.emit(SyncEvent::EndOfStream);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.render_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Audio-mastered playback engine
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct SyncController {
    pub(super) inner: Arc<Inner>,
}

impl SyncController {
    pub fn builder() -> SyncControllerBuilder {
        SyncControllerBuilder::new()
    }

    /// Read media info, build both pipelines and open them at the start
    ///
    /// Leaves the engine in Preloading. Any failure stops the engine and
    /// releases what was built.
    pub async fn init(&self) -> Result<MediaInfo> {
        let current = self.inner.state.current();
        if current != SyncState::Loading {
            return Err(SyncError::InvalidState(format!("init called while {}", current)));
        }

        match self.setup().await {
            Ok(info) => Ok(info),
            Err(e) => {
                self.fail("sync-controller", &e).await;
                Err(e)
            }
        }
    }

    async fn setup(&self) -> Result<MediaInfo> {
        let inner = &self.inner;
        let info = inner.media_info.get_or_try_init(|| inner.backend.media_info())?.clone();
        let video_track = info.video_track()?;
        let audio_track = info.audio_track()?;
        let has_pixel_sink = inner.pixel_sink.lock().is_some();
        if !has_pixel_sink {
            return Err(SyncError::not_ready("no pixel sink attached"));
        }
        log::info!(
            "Loaded {}: {:.2}s, video {}x{} @ {}, audio {} Hz x {}",
            info.source,
            info.duration.as_secs_f64(),
            video_track.width,
            video_track.height,
            video_track.frame_rate,
            audio_track.sample_rate,
            audio_track.channels
        );

        let video = VideoPipeline::new(
            inner.backend.clone(),
            video_track,
            VideoSettings::from(&inner.config),
            inner.reporter.clone(),
        );
        let audio = AudioPipeline::new(
            inner.backend.clone(),
            audio_track,
            AudioSettings::from(&inner.config.audio),
            inner.reporter.clone(),
        )?;

        let factory = inner
            .sink_factory
            .lock()
            .take()
            .ok_or_else(|| SyncError::InvalidState("audio sink already created".to_string()))?;
        let mut sink = factory(audio.format())?;
        sink.start(audio.take_consumer()?)?;
        sink.suspend()?;
        log::info!("Audio sink '{}' attached", sink.name());
        *inner.audio_sink.lock() = Some(sink);

        let start = info.start_time;
        let clock = PlaybackClock::new(
            audio.clock(),
            inner.config.sync.start_threshold_secs,
            inner.config.sync.start_timeout(),
        );
        let pacer = FramePacer::new(video.frame_rate(), start);
        let pipelines = inner.pipelines.get_or_init(|| Pipelines { video, audio });
        pipelines.video.open(start).await?;
        pipelines.audio.open(start).await?;
        *inner.pacer.lock() = Some(pacer);
        *inner.clock.lock() = Some(clock);

        let from = inner.state.transition(SyncState::Preloading)?;
        inner.emit(SyncEvent::StateChanged { from, to: SyncState::Preloading });
        Ok(info)
    }

    /// Wait for both pipelines to load, then start playback
    pub async fn play_when_ready(&self) -> Result<()> {
        let current = self.inner.state.current();
        if current != SyncState::Preloading {
            return Err(SyncError::InvalidState(format!("play_when_ready called while {}", current)));
        }

        match self.start_playback().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail("sync-controller", &e).await;
                Err(e)
            }
        }
    }

    async fn start_playback(&self) -> Result<()> {
        let inner = &self.inner;
        let pipelines = inner.pipelines()?;
        let queued = self.preload(pipelines).await?;
        let start = inner.media_info.get().map(|info| info.start_time).unwrap_or(0.0);

        {
            let _gate = inner.tick_gate.write();
            pipelines.audio.play();
            if let Some(sink) = inner.audio_sink.lock().as_mut() {
                sink.resume()?;
            }
            if let Some(pacer) = inner.pacer.lock().as_mut() {
                pacer.reset_to(start);
            }
            if let Some(clock) = inner.clock.lock().as_mut() {
                clock.arm(Instant::now());
            }
            let from = inner.state.transition(SyncState::Playing)?;
            inner.emit(SyncEvent::StateChanged { from, to: SyncState::Playing });
        }

        log::info!("Playback started at {:.3}s with {} frames queued", start, queued);
        inner.emit(SyncEvent::PlaybackStarted { position: start });
        self.spawn_render_loop();
        Ok(())
    }

    /// Preload video frames and wait for the audio ready signal
    ///
    /// Both waits are bounded by the seek timeout; a timeout logs and
    /// proceeds. Fails if the engine stops meanwhile.
    pub(super) async fn preload(&self, pipelines: &Pipelines) -> Result<usize> {
        let timeout = self.inner.config.sync.seek_timeout();
        let frames = self.inner.config.video.preload_frames;
        let work = async {
            let queued = pipelines.video.preload(frames, timeout).await?;
            if tokio::time::timeout(timeout, pipelines.audio.wait_ready()).await.is_err() {
                log::warn!(
                    "Audio not ready after {:?} ({:.3}s buffered), continuing",
                    timeout,
                    pipelines.audio.buffered_secs()
                );
            }
            Ok::<usize, SyncError>(queued)
        };

        let mut state = self.inner.state.subscribe();
        let stopped = async move {
            let _ = state.wait_for(|state| *state == SyncState::Stopped).await;
        };
        tokio::select! {
            result = work => result,
            _ = stopped => Err(SyncError::InvalidState("playback stopped while preloading".to_string())),
        }
    }

    fn spawn_render_loop(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut state = self.inner.state.subscribe();
        let period = self.inner.config.sync.tick_period();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.tick();
                    }
                    changed = state.changed() => {
                        if changed.is_err() || *state.borrow() == SyncState::Stopped {
                            break;
                        }
                    }
                }
            }
            log::debug!("Render loop exited");
        });
        *self.inner.render_task.lock() = Some(task);
    }

    /// Stop playback and release every resource
    pub async fn stop(&self) -> Result<()> {
        if let Some(from) = self.inner.state.force_stop() {
            self.inner.emit(SyncEvent::StateChanged { from, to: SyncState::Stopped });
        }
        self.release().await;
        Ok(())
    }

    /// Report `error`, stop and release
    pub(super) async fn fail(&self, component: &str, error: &SyncError) {
        self.inner.reporter.report(component, error);
        if let Some(from) = self.inner.state.force_stop() {
            self.inner.emit(SyncEvent::StateChanged { from, to: SyncState::Stopped });
        }
        self.release().await;
    }

    async fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let task = self.inner.render_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if let Some(pipelines) = self.inner.pipelines.get() {
            pipelines.video.close().await;
            pipelines.audio.close().await;
        }
        let sink = self.inner.audio_sink.lock().take();
        if let Some(mut sink) = sink {
            sink.close();
        }
        log::info!("Playback resources released");
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let pipelines = self.inner.pipelines()?;
        pipelines.audio.set_volume(volume);
        Ok(())
    }

    pub fn volume(&self) -> Option<f32> {
        self.inner.pipelines.get().map(|pipelines| pipelines.audio.volume())
    }

    /// Clock position in seconds
    pub fn position(&self) -> f64 {
        self.inner
            .clock
            .lock()
            .as_ref()
            .map(|clock| clock.position())
            .unwrap_or(0.0)
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.inner.media_info.get()
    }

    pub fn add_event_handler(&self, handler: Arc<dyn SyncEventHandler>) {
        self.inner.handlers.write().push(handler);
    }

    pub fn stats(&self) -> PlaybackStats {
        let now = Instant::now();
        let (position, drift_ms) = match self.inner.clock.lock().as_ref() {
            Some(clock) => (clock.position(), clock.drift(now).map(|drift| drift * 1000.0)),
            None => (0.0, None),
        };
        let (frames_rendered, frames_presented, achieved_fps) = match self.inner.pacer.lock().as_ref() {
            Some(pacer) => (pacer.frames_rendered(), pacer.presented(), pacer.achieved_fps()),
            None => (0, 0, 0.0),
        };
        let pipelines = self.inner.pipelines.get();

        PlaybackStats {
            state: self.state(),
            position,
            drift_ms,
            frames_rendered,
            frames_presented,
            achieved_fps,
            seeks_completed: self.inner.seeks_completed.load(Ordering::Relaxed),
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            video: pipelines.map(|p| p.video.stats()).unwrap_or_default(),
            audio: pipelines.map(|p| p.audio.stats()).unwrap_or_default(),
        }
    }
}
