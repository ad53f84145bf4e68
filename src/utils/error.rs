//! Error types for syncplay
//!
//! This module defines the error taxonomy shared by every pipeline stage and
//! the reporting hook components use for errors they recover from locally.
//! We use thiserror for the error type and anyhow at application edges.

use std::sync::Arc;
use thiserror::Error;

/// Main error type for syncplay
#[derive(Error, Debug)]
pub enum SyncError {
    /// A required track or decoder configuration is absent; fatal to setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The decode unit rejected a chunk; the chunk is skipped
    #[error("Decode error: {0}")]
    Decode(String),

    /// An operation ran before one of its dependencies was initialized
    #[error("Resource not ready: {0}")]
    ResourceNotReady(String),

    /// A ring buffer write would have exceeded the free space
    #[error("Buffer overflow: {requested} samples requested, {available} available")]
    BufferOverflow {
        /// Samples the producer tried to write
        requested: usize,
        /// Samples that actually fit
        available: usize,
    },

    /// Audio output errors
    #[error("Audio error: {0}")]
    Audio(String),

    /// Chunk source errors
    #[error("Source error: {0}")]
    Source(String),

    /// Operation not allowed in the current playback state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a decode error from string
    pub fn decode_error<S: Into<String>>(msg: S) -> Self {
        SyncError::Decode(msg.into())
    }

    /// Create a not-ready error from string
    pub fn not_ready<S: Into<String>>(msg: S) -> Self {
        SyncError::ResourceNotReady(msg.into())
    }

    /// Whether the error is recovered locally by skipping the offending unit
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::Decode(_) | SyncError::BufferOverflow { .. })
    }
}

/// Convenience type alias for Results in syncplay
pub type Result<T> = std::result::Result<T, SyncError>;

/// Extension trait for converting other errors to SyncError
pub trait IntoSyncError<T> {
    /// Convert this error into a SyncError with the given context
    fn config_err(self, context: &str) -> Result<T>;
    fn decode_err(self, context: &str) -> Result<T>;
    fn audio_err(self, context: &str) -> Result<T>;
    fn source_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoSyncError<T> for std::result::Result<T, E> {
    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncError::Configuration(format!("{}: {}", context, e)))
    }

    fn decode_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncError::Decode(format!("{}: {}", context, e)))
    }

    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncError::Audio(format!("{}: {}", context, e)))
    }

    fn source_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SyncError::Source(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::SyncError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::SyncError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}

/// Sink for errors a component recovers from without failing the caller
///
/// Decode rejections, ring overflows and sink failures are reported here and
/// the pipeline keeps running.
pub trait ErrorReporter: Send + Sync {
    /// Report an error raised by `component`
    fn report(&self, component: &str, error: &SyncError);
}

/// Shared handle to an error reporter
pub type SharedReporter = Arc<dyn ErrorReporter>;

/// Default reporter that forwards everything to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, component: &str, error: &SyncError) {
        if error.is_recoverable() {
            log::warn!("[{}] {}", component, error);
        } else {
            log::error!("[{}] {}", component, error);
        }
    }
}

/// Build the default shared reporter
pub fn log_reporter() -> SharedReporter {
    Arc::new(LogReporter)
}
