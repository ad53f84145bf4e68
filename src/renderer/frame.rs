//! Presentation rate tracking
//!
//! Keeps a short history of presented frames for rate and interval
//! statistics, and logs the achieved rate once per reporting period.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// History kept for statistics: four seconds at 60 fps
const MAX_HISTORY: usize = 240;

#[derive(Debug, Clone, Copy)]
struct Presentation {
    at: Instant,
    pts: i64,
}

/// Measures the achieved presentation rate
#[derive(Debug)]
pub struct PresentationMeter {
    history: VecDeque<Presentation>,
    /// Frames presented over the meter's lifetime
    presented: u64,
    /// Start and count of the current reporting window
    window_start: Instant,
    window_frames: u64,
    report_every: Duration,
}

impl PresentationMeter {
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(1))
    }

    pub fn with_report_interval(report_every: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(MAX_HISTORY),
            presented: 0,
            window_start: Instant::now(),
            window_frames: 0,
            report_every,
        }
    }

    /// Record a frame presented now
    pub fn record(&mut self, pts: i64) {
        self.record_at(Instant::now(), pts);
    }

    fn record_at(&mut self, at: Instant, pts: i64) {
        self.history.push_back(Presentation { at, pts });
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        self.presented += 1;
        self.window_frames += 1;

        let elapsed = at.saturating_duration_since(self.window_start);
        if elapsed >= self.report_every {
            log::debug!(
                "Achieved {} frames in {:.2}s ({:.1} fps)",
                self.window_frames,
                elapsed.as_secs_f64(),
                self.window_frames as f64 / elapsed.as_secs_f64()
            );
            self.window_start = at;
            self.window_frames = 0;
        }
    }

    /// Restart the reporting window, e.g. after a seek
    pub fn reset_window(&mut self) {
        self.window_start = Instant::now();
        self.window_frames = 0;
        self.history.clear();
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Timestamp of the most recent presentation
    pub fn last_pts(&self) -> Option<i64> {
        self.history.back().map(|p| p.pts)
    }

    /// Presentation rate over the recorded history
    pub fn fps(&self) -> f64 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) if self.history.len() > 1 => {
                let span = last.at.saturating_duration_since(first.at).as_secs_f64();
                if span > 0.0 {
                    (self.history.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Mean interval between the last 60 presentations, in milliseconds
    pub fn avg_interval_ms(&self) -> f64 {
        let recent: Vec<_> = self.history.iter().rev().take(60).collect();
        if recent.len() < 2 {
            return 0.0;
        }

        let total: Duration = recent
            .windows(2)
            .map(|w| w[0].at.saturating_duration_since(w[1].at))
            .sum();
        total.as_secs_f64() * 1000.0 / (recent.len() - 1) as f64
    }
}

impl Default for PresentationMeter {
    fn default() -> Self {
        Self::new()
    }
}
