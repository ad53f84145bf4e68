//! Integration tests for seeking
//!
//! These tests verify the seek sequence end to end:
//! - Forward and backward seeks resume at the target
//! - No stale frame is presented after a seek
//! - Concurrent seeks are sequenced
//! - Seeks outside Playing are rejected

use anyhow::Result;
use serial_test::serial;
use std::time::Duration;
use syncplay::utils::secs_to_micros;
use syncplay::{SyncError, SyncEvent, SyncState};
use syncplay_integration_tests::{short_media, Harness};

/// Frames this far below the target are still accepted
const TOLERANCE: f64 = 0.001;

async fn seek_and_collect(harness: &Harness, target: f64) -> Result<Vec<i64>> {
    harness.controller.seek(target).await?;
    harness.frames.clear();
    harness.wait_for_frames(10, Duration::from_secs(5)).await?;
    Ok(harness.frames.timestamps())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_seek_forward_then_back() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;
    harness.wait_for_frames(10, Duration::from_secs(5)).await?;

    let presented = seek_and_collect(&harness, 15.5).await?;
    assert!(presented.iter().all(|&pts| pts >= secs_to_micros(15.5 - TOLERANCE)));
    assert!(presented[0] < secs_to_micros(15.6));
    assert!(presented.windows(2).all(|w| w[0] <= w[1]));
    assert!(harness.controller.position() >= 15.5);

    let presented = seek_and_collect(&harness, 5.0).await?;
    assert!(presented.iter().all(|&pts| pts >= secs_to_micros(5.0 - TOLERANCE)));
    assert!(presented[0] < secs_to_micros(5.1));
    assert!(presented.windows(2).all(|w| w[0] <= w[1]));

    let position = harness.controller.position();
    assert!((5.0..6.0).contains(&position), "position {}", position);

    let stats = harness.controller.stats();
    assert_eq!(stats.seeks_completed, 2);
    assert!(stats.frames_rendered >= 150 && stats.frames_rendered < 200);
    // Keyframe-aligned reopen at 15.5 decodes 15.0..15.5 only to drop it
    assert!(stats.video.frames_discarded >= 15);
    assert_eq!(stats.video.rebuilds, 2);
    assert_eq!(stats.audio.ready_resolutions, 3);
    assert_eq!(harness.events.count(|e| matches!(e, SyncEvent::SeekCompleted { .. })), 2);

    harness.controller.stop().await?;
    assert_eq!(harness.media.frame_pool().live(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_back_to_back_seeks_leave_no_stale_frames() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;

    harness.controller.seek(15.0).await?;
    let presented = seek_and_collect(&harness, 5.0).await?;

    assert!(presented.iter().all(|&pts| pts < secs_to_micros(6.0)), "stale frames from 15 s");
    assert!(presented.iter().all(|&pts| pts >= secs_to_micros(5.0 - TOLERANCE)));
    let stats = harness.controller.stats();
    assert!(stats.frames_rendered >= 150 && stats.frames_rendered < 200);
    assert!(stats.video.frames_flushed > 0);

    harness.controller.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_position_never_decreases_after_seek() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;
    harness.controller.seek(8.0).await?;

    let mut last = harness.controller.position();
    assert!(last >= 8.0);
    for _ in 0..25 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let position = harness.controller.position();
        assert!(position >= last);
        last = position;
    }

    harness.controller.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_concurrent_seeks_are_sequenced() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.start().await?;

    let first = harness.controller.clone();
    let second = harness.controller.clone();
    let (a, b) = tokio::join!(first.seek(10.0), second.seek(20.0));
    a?;
    b?;

    assert_eq!(harness.controller.state(), SyncState::Playing);
    assert!(harness.controller.position() >= 20.0);
    assert_eq!(harness.controller.stats().seeks_completed, 2);

    let states = harness.events.states();
    assert_eq!(
        states,
        vec![
            SyncState::Preloading,
            SyncState::Playing,
            SyncState::Seeking,
            SyncState::Playing,
            SyncState::Seeking,
            SyncState::Playing,
        ]
    );

    harness.controller.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_seek_outside_playing_is_rejected() -> Result<()> {
    let harness = Harness::new(short_media(30))?;
    harness.controller.init().await?;

    let err = harness.controller.seek(3.0).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
    assert_eq!(harness.controller.state(), SyncState::Preloading);

    harness.controller.stop().await?;
    let err = harness.controller.seek(3.0).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidState(_)));
    assert_eq!(harness.media.frame_pool().live(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_seek_to_end_of_media() -> Result<()> {
    let harness = Harness::new(short_media(5))?;
    harness.start().await?;

    harness.controller.seek(60.0).await?;
    assert_eq!(harness.controller.state(), SyncState::Playing);
    assert!(harness.controller.position() >= 5.0);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while harness.events.count(|e| *e == SyncEvent::EndOfStream) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no end of stream after seeking past the end");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    harness.controller.stop().await?;
    Ok(())
}
