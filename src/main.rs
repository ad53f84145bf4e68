use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use syncplay::decoder::synthetic::{SyntheticConfig, SyntheticMedia};
use syncplay::decoder::FrameRate;
use syncplay::renderer::{RecordingHandle, RecordingSink};
use syncplay::utils::format_position;
use syncplay::{Config, SyncController, SyncEvent, SyncEventHandler};

/// syncplay - play a synthetic test stream against the audio clock
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Length of the generated stream in seconds
    #[arg(long, default_value = "10")]
    duration: f64,

    /// Video frame rate, e.g. 30 or 30000/1001
    #[arg(long, default_value = "30")]
    fps: String,

    /// Audio sample rate in Hz
    #[arg(long, default_value = "48000")]
    sample_rate: u32,

    /// Audio channel count
    #[arg(long, default_value = "2")]
    channels: u16,

    /// Seek targets in seconds, visited in order
    #[arg(long = "seek", value_name = "SECONDS")]
    seeks: Vec<f64>,

    /// Seconds to play before each seek and after the last one
    #[arg(long, default_value = "2")]
    play_secs: f64,

    /// Volume (0-100)
    #[arg(short, long, default_value = "70")]
    volume: u8,

    /// Presentation surface width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Presentation surface height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Configuration file to use instead of the default locations
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print final statistics as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Play audio through the named output device
    #[cfg(feature = "cpal")]
    #[arg(long, value_name = "NAME")]
    device: Option<String>,

    /// Play audio through the default output device
    #[cfg(feature = "cpal")]
    #[arg(long)]
    speakers: bool,

    /// List audio output devices and exit
    #[cfg(feature = "cpal")]
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting syncplay v{}", env!("CARGO_PKG_VERSION"));

    #[cfg(feature = "cpal")]
    if args.list_devices {
        for name in syncplay::audio::CpalSink::output_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let media = Arc::new(SyntheticMedia::new(SyntheticConfig {
        duration: Duration::from_secs_f64(args.duration.max(0.0)),
        frame_rate: FrameRate::parse(&args.fps)?,
        sample_rate: args.sample_rate,
        channels: args.channels,
        ..Default::default()
    }));
    let (pixel_sink, presented) = RecordingSink::new(args.width, args.height);

    let builder = SyncController::builder()
        .with_backend(media.clone())
        .with_config(config)
        .with_pixel_sink(Box::new(pixel_sink))
        .with_event_handler(Arc::new(LoggingEventHandler));

    #[cfg(feature = "cpal")]
    let builder = if args.speakers || args.device.is_some() {
        let device = args.device.clone();
        builder.with_audio_sink_factory(move |format| {
            let sink: Box<dyn syncplay::audio::AudioSink> = Box::new(syncplay::audio::CpalSink::new(format, device));
            Ok(sink)
        })
    } else {
        builder
    };

    let controller = builder.build()?;

    tokio::select! {
        result = run(&controller, &args) => {
            if let Err(e) = &result {
                error!("Playback failed: {}", e);
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    let stats = controller.stats();
    controller.stop().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_summary(&controller, &stats, &presented);
    }
    info!("Frames still held after stop: {}", media.frame_pool().live());
    Ok(())
}

async fn run(controller: &SyncController, args: &Args) -> Result<()> {
    controller.init().await?;
    controller.set_volume(f32::from(args.volume.min(100)) / 100.0)?;
    controller.play_when_ready().await?;

    let dwell = Duration::from_secs_f64(args.play_secs.max(0.0));
    tokio::time::sleep(dwell).await;
    for &target in &args.seeks {
        controller.seek(target).await?;
        tokio::time::sleep(dwell).await;
    }
    Ok(())
}

fn print_summary(controller: &SyncController, stats: &syncplay::PlaybackStats, presented: &RecordingHandle) {
    if let Some(info) = controller.media_info() {
        println!("Source:      {}", info.source);
    }
    println!("Position:    {}", format_position(stats.position));
    println!(
        "Frames:      {} presented ({} scheduled, {:.1} fps)",
        presented.len(),
        stats.frames_rendered,
        stats.achieved_fps
    );
    println!(
        "Video queue: max depth {} of {}, {} discarded on arrival",
        stats.video.max_depth, stats.video.high_watermark, stats.video.frames_discarded
    );
    println!(
        "Audio ring:  {:.0}% full, {} overflows, {} underruns",
        stats.audio.buffer_health, stats.audio.overflow_events, stats.audio.underruns
    );
    if let Some(drift) = stats.drift_ms {
        println!("Drift:       {:+.1} ms", drift);
    }
    println!("Seeks:       {}", stats.seeks_completed);
}

/// Event handler that logs events
struct LoggingEventHandler;

impl SyncEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::StateChanged { from, to } => log::debug!("State: {} -> {}", from, to),
            SyncEvent::PlaybackStarted { position } => info!("Playback started at {}", format_position(*position)),
            SyncEvent::SeekCompleted { position } => info!("Resumed at {}", format_position(*position)),
            SyncEvent::EndOfStream => info!("End of stream reached"),
            SyncEvent::Error { component, message } => error!("[{}] {}", component, message),
        }
    }
}
