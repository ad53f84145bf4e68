//! Accounting for decoder-owned frame buffers
//!
//! Decode units may pool the buffers behind their frames, so every frame
//! carries a lease that must come back. The pool only counts; it lets tests
//! and shutdown checks prove nothing leaked.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    leased: AtomicU64,
    returned: AtomicU64,
}

/// Shared counter of outstanding frame leases
#[derive(Debug, Clone, Default)]
pub struct FramePool {
    counters: Arc<PoolCounters>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a lease for a freshly decoded frame
    pub fn lease(&self) -> FrameLease {
        self.counters.live.fetch_add(1, Ordering::AcqRel);
        self.counters.leased.fetch_add(1, Ordering::Relaxed);
        FrameLease {
            counters: Some(self.counters.clone()),
        }
    }

    /// Frames currently alive
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Acquire)
    }

    /// Frames ever leased
    pub fn leased(&self) -> u64 {
        self.counters.leased.load(Ordering::Relaxed)
    }

    /// Frames returned to the pool
    pub fn returned(&self) -> u64 {
        self.counters.returned.load(Ordering::Relaxed)
    }
}

/// Claim on one pooled frame buffer, returned on drop
#[derive(Debug)]
pub struct FrameLease {
    counters: Option<Arc<PoolCounters>>,
}

impl FrameLease {
    /// Lease for a frame that does not come from a pool
    pub fn detached() -> Self {
        Self { counters: None }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(counters) = self.counters.take() {
            counters.live.fetch_sub(1, Ordering::AcqRel);
            counters.returned.fetch_add(1, Ordering::Relaxed);
        }
    }
}
