//! Utility module for syncplay
//!
//! This module provides common utilities used throughout the engine:
//! - Error handling with custom error types and the error reporting hook
//! - Configuration management
//! - One-shot readiness signalling
//! - Common helper functions

pub mod config;
pub mod error;
pub mod signal;

// Re-export commonly used items
pub use config::{AudioConfig, Config, GeneralConfig, SyncConfig, VideoConfig};
pub use error::{log_reporter, ErrorReporter, LogReporter, Result, SharedReporter, SyncError};
pub use signal::ReadySignal;

/// Initialize the engine configuration
///
/// Loads configuration from:
/// 1. Default values
/// 2. System configuration file
/// 3. User configuration file
/// 4. Environment variables
///
/// # Returns
///
/// Returns the loaded configuration or an error if loading fails
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Format a playback position for display
///
/// # Arguments
///
/// * `seconds` - Position in seconds
///
/// # Returns
///
/// Formatted string "MM:SS.mmm", or "HH:MM:SS.mmm" past the hour
pub fn format_position(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, secs, millis)
    }
}

/// Convert seconds to microsecond timestamps
pub fn secs_to_micros(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

/// Convert microsecond timestamps to seconds
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0.0), "00:00.000");
        assert_eq!(format_position(5.25), "00:05.250");
        assert_eq!(format_position(61.0), "01:01.000");
        assert_eq!(format_position(3725.5), "01:02:05.500");
        assert_eq!(format_position(-1.0), "00:00.000");
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(secs_to_micros(1.5), 1_500_000);
        assert_eq!(micros_to_secs(33_367), 0.033367);
    }
}
