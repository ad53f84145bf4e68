//! Device-independent audio sinks
//!
//! [`RealtimeSink`] stands in for an audio device: a dedicated thread pulls
//! from the ring at the stream's sample rate, paced by the wall clock.
//! [`ManualSink`] renders only when asked, which makes audio time fully
//! controllable in tests.

use crate::audio::{AudioFormat, AudioSink, SampleConsumer};
use crate::utils::error::{IntoSyncError, Result, SyncError};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest stretch rendered in one wakeup; anything beyond is skipped
const MAX_CATCH_UP: Duration = Duration::from_millis(250);

enum SinkCommand {
    Suspend,
    Resume,
    Stop,
}

/// Wall-clock paced sink running on its own thread
pub struct RealtimeSink {
    format: AudioFormat,
    period: Duration,
    control: Option<Sender<SinkCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl RealtimeSink {
    /// Sink rendering every `period`
    pub fn new(format: AudioFormat, period: Duration) -> Self {
        Self {
            format,
            period: period.max(Duration::from_millis(1)),
            control: None,
            worker: None,
        }
    }

    fn send(&self, command: SinkCommand) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| SyncError::not_ready("audio sink not started"))?;
        control
            .send(command)
            .map_err(|_| SyncError::Audio("audio thread exited".to_string()))
    }
}

impl AudioSink for RealtimeSink {
    fn start(&mut self, consumer: SampleConsumer) -> Result<()> {
        if self.worker.is_some() {
            return Err(SyncError::InvalidState("audio sink already started".to_string()));
        }

        let (tx, rx) = unbounded();
        let format = self.format;
        let period = self.period;
        let worker = thread::Builder::new()
            .name("syncplay-audio".to_string())
            .spawn(move || {
                let mut consumer = consumer;
                let rate = f64::from(format.sample_rate);
                let max_frames = (MAX_CATCH_UP.as_secs_f64() * rate) as u64;
                let mut origin = Instant::now();
                let mut rendered: u64 = 0;
                let mut suspended = false;
                let mut buffer = Vec::new();

                loop {
                    match rx.recv_timeout(period) {
                        Ok(SinkCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(SinkCommand::Suspend) => {
                            suspended = true;
                            continue;
                        }
                        Ok(SinkCommand::Resume) => {
                            if suspended {
                                suspended = false;
                                origin = Instant::now();
                                rendered = 0;
                            }
                            continue;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if suspended {
                        continue;
                    }

                    let due = (origin.elapsed().as_secs_f64() * rate) as u64;
                    let mut frames = due.saturating_sub(rendered);
                    if frames > max_frames {
                        log::debug!("Audio thread stalled, skipping {} frames", frames - max_frames);
                        rendered += frames - max_frames;
                        frames = max_frames;
                    }
                    if frames == 0 {
                        continue;
                    }

                    buffer.resize(frames as usize * format.channels, 0.0);
                    consumer.render(&mut buffer);
                    rendered += frames;
                }
                log::debug!("Audio thread stopped");
            })
            .audio_err("Failed to spawn audio thread")?;

        log::info!(
            "Real-time sink started: {} Hz x {}, period {:?}",
            self.format.sample_rate,
            self.format.channels,
            self.period
        );
        self.control = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.send(SinkCommand::Resume)
    }

    fn suspend(&mut self) -> Result<()> {
        self.send(SinkCommand::Suspend)
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(SinkCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }

    fn name(&self) -> &str {
        "realtime"
    }
}

impl Drop for RealtimeSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct ManualState {
    consumer: Option<SampleConsumer>,
    suspended: bool,
    closed: bool,
}

/// Sink that renders only when its handle pulls
pub struct ManualSink {
    state: Arc<Mutex<ManualState>>,
}

/// Test-side handle driving a [`ManualSink`]
#[derive(Clone)]
pub struct ManualSinkHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSink {
    pub fn new() -> (ManualSink, ManualSinkHandle) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (ManualSink { state: state.clone() }, ManualSinkHandle { state })
    }
}

impl ManualSinkHandle {
    /// Render `frames` frames as a device callback would
    ///
    /// Returns the interleaved output; empty while the sink is suspended,
    /// closed or not yet started.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut state = self.state.lock();
        if state.suspended || state.closed {
            return Vec::new();
        }
        let Some(consumer) = state.consumer.as_mut() else {
            return Vec::new();
        };
        let mut out = vec![0.0; frames * consumer.format().channels];
        consumer.render(&mut out);
        out
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().consumer.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl AudioSink for ManualSink {
    fn start(&mut self, consumer: SampleConsumer) -> Result<()> {
        let mut state = self.state.lock();
        if state.consumer.is_some() {
            return Err(SyncError::InvalidState("audio sink already started".to_string()));
        }
        state.consumer = Some(consumer);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.state.lock().suspended = false;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        self.state.lock().suspended = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.consumer = None;
    }

    fn name(&self) -> &str {
        "manual"
    }
}
