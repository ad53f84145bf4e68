//! Integration tests for playback
//!
//! These tests drive the full engine over synthetic media:
//! - Startup and clock anchoring
//! - Ordered, paced presentation within the queue watermark
//! - Recovery from a corrupt chunk
//! - End of stream, stop and resource release

use anyhow::Result;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use syncplay::audio::ManualSink;
use syncplay::decoder::synthetic::{SyntheticConfig, SyntheticMedia};
use syncplay::decoder::FrameRate;
use syncplay::utils::secs_to_micros;
use syncplay::{SyncError, SyncEvent, SyncState};
use syncplay_integration_tests::{short_media, FaultInjectingBackend, Harness};

fn frame_pts(index: u64) -> i64 {
    let rate = FrameRate::new(30, 1).expect("valid rate");
    secs_to_micros(rate.frame_time(index))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_playback_presents_frames_in_order() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;
    assert_eq!(harness.controller.state(), SyncState::Playing);

    harness.wait_for_frames(45, Duration::from_secs(5)).await?;
    let stats = harness.controller.stats();
    let presented = harness.frames.timestamps();

    assert_eq!(presented[0], 0);
    assert!(presented.windows(2).all(|w| w[0] <= w[1]), "presentation went backwards");
    assert!(stats.video.max_depth <= stats.video.high_watermark);
    assert_eq!(stats.video.frames_overflowed, 0);
    assert_eq!(stats.audio.overflow_events, 0);
    assert!(stats.audio.ready_resolutions >= 1);

    // The real-time sink consumes at wall-clock rate
    let drift = stats.drift_ms.expect("clock is anchored");
    assert!(drift.abs() < 250.0, "drift {} ms", drift);

    harness.controller.stop().await?;
    assert_eq!(harness.controller.state(), SyncState::Stopped);
    assert_eq!(harness.media.frame_pool().live(), 0);
    assert_eq!(harness.events.count(|e| matches!(e, SyncEvent::PlaybackStarted { .. })), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_position_is_monotonic_while_playing() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;

    let mut last = harness.controller.position();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let position = harness.controller.position();
        assert!(position >= last, "position moved back from {} to {}", last, position);
        last = position;
    }
    assert!(last > 0.5);

    harness.controller.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_clock_anchors_on_first_audio_progress() -> Result<()> {
    let media = Arc::new(SyntheticMedia::new(short_media(30)));
    let (sink, device) = ManualSink::new();
    let harness = Harness::with_backend(media.clone(), media, Some(Box::new(sink)))?;
    harness.start().await?;

    // Nothing consumed yet: the clock waits and nothing is drawn
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.controller.position(), 0.0);
    assert!(harness.frames.is_empty());

    // 50 ms of audio at 48 kHz
    let rendered = device.pull(2_400);
    assert_eq!(rendered.len(), 4_800);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let position = harness.controller.position();
    assert!((position - 0.05).abs() < 1e-6, "position {}", position);
    assert_eq!(harness.frames.timestamps(), vec![0, frame_pts(1)]);
    assert!(harness.controller.stats().drift_ms.is_some());

    harness.controller.stop().await?;
    assert!(device.is_closed());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_corrupt_chunk_is_reported_and_skipped() -> Result<()> {
    let media = Arc::new(SyntheticMedia::new(short_media(10)));
    let backend = Arc::new(FaultInjectingBackend::new(media.clone(), 37));
    let harness = Harness::with_backend(backend, media, None)?;
    harness.start().await?;

    harness.wait_for_pts(frame_pts(45), Duration::from_secs(5)).await?;
    assert_eq!(harness.controller.state(), SyncState::Playing);
    assert_eq!(harness.reporter.decode_errors(), 1);
    assert!(harness
        .events
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::Error { component, .. } if component == "video-decoder")));

    let presented = harness.frames.timestamps();
    assert!(presented.contains(&frame_pts(36)));
    assert!(!presented.contains(&frame_pts(37)));
    assert!(presented.contains(&frame_pts(38)));
    assert_eq!(harness.controller.stats().video.chunks_rejected, 1);

    harness.controller.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_end_of_stream_presents_every_frame() -> Result<()> {
    let harness = Harness::new(short_media(1))?;
    harness.start().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while harness.events.count(|e| *e == SyncEvent::EndOfStream) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no end of stream event");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    harness.wait_for_frames(30, Duration::from_secs(1)).await?;

    // Playback stays up until stopped
    assert_eq!(harness.controller.state(), SyncState::Playing);
    assert_eq!(harness.frames.len(), 30);
    assert_eq!(harness.events.count(|e| *e == SyncEvent::EndOfStream), 1);

    harness.controller.stop().await?;
    assert_eq!(harness.media.frame_pool().live(), 0);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_missing_audio_track_stops_engine() -> Result<()> {
    let harness = Harness::new(SyntheticConfig {
        include_audio: false,
        ..short_media(5)
    })?;

    let err = harness.controller.init().await.unwrap_err();
    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(harness.controller.state(), SyncState::Stopped);
    assert_eq!(harness.reporter.count(), 1);
    assert_eq!(harness.events.states(), vec![SyncState::Stopped]);

    let err = harness.controller.play_when_ready().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_stop_releases_once() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;
    harness.wait_for_frames(5, Duration::from_secs(5)).await?;

    harness.controller.stop().await?;
    harness.controller.stop().await?;

    let stopped = harness.events.count(|e| {
        matches!(
            e,
            SyncEvent::StateChanged {
                to: SyncState::Stopped,
                ..
            }
        )
    });
    assert_eq!(stopped, 1);
    assert_eq!(
        harness.events.states(),
        vec![SyncState::Preloading, SyncState::Playing, SyncState::Stopped]
    );

    // Nothing is drawn once stopped
    let presented = harness.frames.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.frames.len(), presented);
    assert_eq!(harness.media.frame_pool().live(), 0);
    Ok(())
}
