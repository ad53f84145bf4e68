//! Decode backpressure
//!
//! Wraps an opaque decode unit and throttles submission once the unit's
//! internal queue reaches a ceiling. A chunk that arrives while the unit is
//! saturated is parked and resubmitted at the next scheduling opportunity.
//! Chunks the unit rejects are reported and skipped.

use crate::decoder::{CompressedChunk, DecodeUnit, DecoderConfig, DecoderState};
use crate::utils::error::{Result, SyncError};
use crate::utils::SharedReporter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to a submitted chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Forwarded to the decode unit
    Submitted,
    /// Parked until the unit drains below its ceiling
    Deferred,
    /// Rejected by the decode unit, reported and skipped
    Rejected,
}

/// Decode statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Chunks forwarded to the unit
    pub submitted: u64,
    /// Times a chunk was parked at the ceiling
    pub deferred: u64,
    /// Chunks the unit rejected
    pub rejected: u64,
}

/// Submission counters shared by every controller a pipeline builds
///
/// A seek replaces the controller; the counts carry over.
#[derive(Debug, Default)]
pub struct DecodeCounters {
    submitted: AtomicU64,
    deferred: AtomicU64,
    rejected: AtomicU64,
}

impl DecodeCounters {
    pub fn snapshot(&self) -> DecodeStats {
        DecodeStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Backpressure controller around one decode unit
pub struct DecodeController {
    unit: Box<dyn DecodeUnit>,
    ceiling: usize,
    parked: Option<CompressedChunk>,
    component: &'static str,
    reporter: SharedReporter,
    counters: Arc<DecodeCounters>,
}

impl DecodeController {
    /// Wrap `unit`, deferring submission at `ceiling` outstanding units
    pub fn new(
        unit: Box<dyn DecodeUnit>,
        ceiling: usize,
        component: &'static str,
        reporter: SharedReporter,
        counters: Arc<DecodeCounters>,
    ) -> Self {
        Self {
            unit,
            ceiling: ceiling.max(1),
            parked: None,
            component,
            reporter,
            counters,
        }
    }

    /// Configure the wrapped unit; failure is a configuration error
    pub fn configure(&mut self, config: &DecoderConfig) -> Result<()> {
        self.unit.configure(config).map_err(|e| match e {
            SyncError::Configuration(msg) => SyncError::Configuration(msg),
            other => SyncError::Configuration(format!("{} configure failed: {}", self.component, other)),
        })
    }

    /// The unit holds `ceiling` or more outstanding units
    pub fn is_saturated(&self) -> bool {
        self.unit.decode_queue_size() >= self.ceiling
    }

    /// Units inside the decoder plus any parked chunk
    pub fn outstanding(&self) -> usize {
        self.unit.decode_queue_size() + usize::from(self.parked.is_some())
    }

    /// A new chunk can be submitted without being parked
    pub fn ready_for_input(&self) -> bool {
        self.parked.is_none() && !self.is_saturated()
    }

    /// Submit a chunk, parking it if the unit is saturated
    ///
    /// Returns an error only when the unit is unusable (unconfigured or
    /// closed); rejected chunks are reported and yield `Rejected`.
    pub fn submit(&mut self, chunk: CompressedChunk) -> Result<SubmitOutcome> {
        if self.unit.state() != DecoderState::Configured {
            return Err(SyncError::not_ready(format!("{} is not configured", self.component)));
        }

        if self.parked.is_some() {
            return Err(SyncError::InvalidState(format!(
                "{} already holds a deferred chunk",
                self.component
            )));
        }

        if self.is_saturated() {
            log::trace!("{} saturated, deferring chunk {}", self.component, chunk.sequence);
            self.parked = Some(chunk);
            self.counters.deferred.fetch_add(1, Ordering::Relaxed);
            return Ok(SubmitOutcome::Deferred);
        }

        self.forward(chunk)
    }

    /// Resubmit the parked chunk if the unit has drained
    ///
    /// Returns `None` when nothing is parked or the unit is still saturated.
    pub fn poll_deferred(&mut self) -> Result<Option<SubmitOutcome>> {
        if self.parked.is_none() || self.is_saturated() {
            return Ok(None);
        }
        match self.parked.take() {
            Some(chunk) => self.forward(chunk).map(Some),
            None => Ok(None),
        }
    }

    fn forward(&mut self, chunk: CompressedChunk) -> Result<SubmitOutcome> {
        let sequence = chunk.sequence;
        match self.unit.decode(chunk) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(SubmitOutcome::Submitted)
            }
            Err(e) if e.is_recoverable() => {
                log::debug!("{} rejected chunk {}", self.component, sequence);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.reporter.report(self.component, &e);
                Ok(SubmitOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.counters.snapshot()
    }

    pub fn state(&self) -> DecoderState {
        self.unit.state()
    }

    /// Drop any parked chunk and close the unit
    pub fn close(&mut self) {
        self.parked = None;
        if self.unit.state() != DecoderState::Closed {
            self.unit.close();
        }
    }
}

impl Drop for DecodeController {
    fn drop(&mut self) {
        self.close();
    }
}
