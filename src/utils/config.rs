//! Configuration management for syncplay
//!
//! This module handles loading the engine tunables (queue watermarks, audio
//! buffering targets, clock thresholds) from config files and environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::utils::error::{IntoSyncError, Result, SyncError};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Video pipeline configuration
    pub video: VideoConfig,

    /// Audio pipeline configuration
    pub audio: AudioConfig,

    /// Clock and render loop configuration
    pub sync: SyncConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Video pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// High-watermark of the decoded frame queue
    pub max_queued_frames: usize,

    /// Frames preloaded before playback starts and after a seek
    pub preload_frames: usize,

    /// Outstanding units inside the video decoder before submission defers
    pub decode_queue_ceiling: usize,
}

/// Audio pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Buffered audio, in seconds, at which fill stops and readiness fires
    pub decode_target_secs: f64,

    /// Ring buffer capacity in seconds
    pub buffer_secs: f64,

    /// Outstanding units inside the audio decoder before fill backs off
    pub decode_queue_ceiling: usize,

    /// Initial volume (0.0 - 1.0)
    pub volume: f32,

    /// Time constant of the volume ramp in seconds
    pub volume_ramp_secs: f32,

    /// Wake-up period of the thread-driven audio sink in milliseconds
    pub sink_period_ms: u64,
}

/// Clock and render loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Render loop tick rate
    pub tick_rate_hz: u32,

    /// Audio position past which the clock anchors without waiting for movement
    pub start_threshold_secs: f64,

    /// Upper bound on waiting for audio output to start moving
    pub start_timeout_ms: u64,

    /// Upper bound on waiting for audio readiness during a seek
    pub seek_timeout_ms: u64,

    /// Frames earlier than `seek target - tolerance` are dropped after a seek
    pub seek_tolerance_secs: f64,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_queued_frames: 30,
            preload_frames: 10,
            decode_queue_ceiling: 5,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            decode_target_secs: 0.3,
            buffer_secs: 0.6,
            decode_queue_ceiling: 5,
            volume: 1.0,
            volume_ramp_secs: 0.3,
            sink_period_ms: 10,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            start_threshold_secs: 0.08,
            start_timeout_ms: 2000,
            seek_timeout_ms: 5000,
            seek_tolerance_secs: 0.001,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Render loop period
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/syncplay/config.toml on Linux)
    /// 3. User config file (~/.config/syncplay/config.toml on Linux)
    /// 4. Environment variables (SYNCPLAY_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load and validate a single TOML file, with defaults for absent keys
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| SyncError::Configuration("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self)
            .config_err("Failed to serialize config")?;

        std::fs::write(path, toml)
            .config_err("Failed to write config file")?;

        Ok(())
    }

    /// Parse a TOML document; sections and keys left out keep their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).config_err("Failed to parse config file")
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .config_err("Failed to read config file")?;
        Self::from_toml_str(&contents)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| SyncError::Configuration(format!("Invalid {}", name))),
                Err(_) => Ok(None),
            }
        }

        if let Some(frames) = parse_var("SYNCPLAY_VIDEO_MAX_QUEUED_FRAMES")? {
            self.video.max_queued_frames = frames;
        }

        if let Some(target) = parse_var("SYNCPLAY_AUDIO_DECODE_TARGET_SECS")? {
            self.audio.decode_target_secs = target;
        }

        if let Some(volume) = parse_var("SYNCPLAY_AUDIO_VOLUME")? {
            self.audio.volume = volume;
        }

        if let Some(rate) = parse_var("SYNCPLAY_TICK_RATE_HZ")? {
            self.sync.tick_rate_hz = rate;
        }

        if let Ok(log_level) = std::env::var("SYNCPLAY_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.video.max_queued_frames == 0 {
            return Err(SyncError::Configuration("video.max_queued_frames must be non-zero".to_string()));
        }

        if self.video.preload_frames > self.video.max_queued_frames {
            return Err(SyncError::Configuration(
                "video.preload_frames cannot exceed video.max_queued_frames".to_string(),
            ));
        }

        // A ceiling of one would serialize decode with presentation
        if self.video.decode_queue_ceiling < 2 || self.audio.decode_queue_ceiling < 2 {
            return Err(SyncError::Configuration("decode_queue_ceiling must be at least 2".to_string()));
        }

        if !(self.audio.decode_target_secs > 0.0 && self.audio.decode_target_secs < self.audio.buffer_secs) {
            return Err(SyncError::Configuration(
                "audio.decode_target_secs must be positive and below audio.buffer_secs".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(SyncError::Configuration("Audio volume must be between 0.0 and 1.0".to_string()));
        }

        if self.audio.sink_period_ms == 0 {
            return Err(SyncError::Configuration("audio.sink_period_ms must be non-zero".to_string()));
        }

        if self.sync.tick_rate_hz == 0 || self.sync.tick_rate_hz > 1000 {
            return Err(SyncError::Configuration("sync.tick_rate_hz must be within 1..=1000".to_string()));
        }

        if self.sync.start_threshold_secs < 0.0 || self.sync.seek_tolerance_secs < 0.0 {
            return Err(SyncError::Configuration("sync thresholds must not be negative".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/syncplay/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("syncplay").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/syncplay/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("syncplay").join("config.toml"))
    }
}
