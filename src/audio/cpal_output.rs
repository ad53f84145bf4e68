//! CPAL audio sink for syncplay
//!
//! Plays the sample ring through a cpal output stream. The stream is built
//! and owned by a dedicated thread because cpal streams are not `Send` on
//! every platform; the sink talks to that thread over channels.

use crate::audio::{AudioFormat, AudioSink, SampleConsumer};
use crate::utils::error::{IntoSyncError, Result, SyncError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::thread::{self, JoinHandle};

enum StreamCommand {
    Pause,
    Play,
    Stop,
}

/// Audio sink backed by a cpal output device
pub struct CpalSink {
    format: AudioFormat,
    device_name: Option<String>,
    control: Option<Sender<StreamCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Sink on the named output device, or the host default when `None`
    pub fn new(format: AudioFormat, device_name: Option<String>) -> Self {
        Self {
            format,
            device_name,
            control: None,
            worker: None,
        }
    }

    /// Names of the host's output devices
    pub fn output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .audio_err("Failed to enumerate output devices")?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    fn send(&self, command: StreamCommand) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| SyncError::not_ready("audio device not started"))?;
        control
            .send(command)
            .map_err(|_| SyncError::Audio("audio device thread exited".to_string()))
    }
}

fn build_stream(format: AudioFormat, device_name: Option<&str>, mut consumer: SampleConsumer) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .audio_err("Failed to enumerate output devices")?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SyncError::Audio(format!("Device not found: {}", name)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| SyncError::Audio("No default output device found".to_string()))?,
    };

    let channels = u16::try_from(format.channels)
        .map_err(|_| SyncError::Audio(format!("{} channels exceed device limits", format.channels)))?;
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: BufferSize::Default,
    };

    log::info!(
        "Opening audio device {} at {} Hz x {}",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
        format.sample_rate,
        channels
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                consumer.render(data);
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .audio_err("Failed to create audio stream")?;
    stream.play().audio_err("Failed to start audio stream")?;
    Ok(stream)
}

impl AudioSink for CpalSink {
    fn start(&mut self, consumer: SampleConsumer) -> Result<()> {
        if self.worker.is_some() {
            return Err(SyncError::InvalidState("audio device already started".to_string()));
        }

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (tx, rx) = unbounded();
        let format = self.format;
        let device_name = self.device_name.clone();

        let worker = thread::Builder::new()
            .name("syncplay-cpal".to_string())
            .spawn(move || {
                let stream = match build_stream(format, device_name.as_deref(), consumer) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for command in rx.iter() {
                    let result = match command {
                        StreamCommand::Pause => stream.pause(),
                        StreamCommand::Play => stream.play(),
                        StreamCommand::Stop => break,
                    };
                    if let Err(e) = result {
                        log::warn!("Audio stream control failed: {}", e);
                    }
                }
            })
            .audio_err("Failed to spawn audio device thread")?;

        let started = ready_rx
            .recv()
            .map_err(|_| SyncError::Audio("audio device thread exited during setup".to_string()))?;
        if let Err(e) = started {
            let _ = worker.join();
            return Err(e);
        }

        self.control = Some(tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.send(StreamCommand::Play)
    }

    fn suspend(&mut self) -> Result<()> {
        self.send(StreamCommand::Pause)
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(StreamCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Audio device thread panicked");
            }
        }
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}
