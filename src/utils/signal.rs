//! One-shot readiness signal
//!
//! Resolves at most once per epoch and can be awaited by any number of
//! tasks. `rearm` opens a new epoch (used when a seek invalidates buffered
//! state).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;

/// Readiness gate resolved exactly once per epoch
#[derive(Debug)]
pub struct ReadySignal {
    fired: AtomicBool,
    resolutions: AtomicU64,
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            fired: AtomicBool::new(false),
            resolutions: AtomicU64::new(0),
            tx,
        }
    }

    /// Resolve the signal; returns `true` only for the call that resolved it
    pub fn resolve(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        self.tx.send_replace(true);
        true
    }

    /// Start a new epoch; waiters block again until the next `resolve`
    pub fn rearm(&self) {
        self.tx.send_replace(false);
        self.fired.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Total number of resolutions across all epochs
    pub fn resolution_count(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Wait until the signal is resolved in the current epoch
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_resolves_once_per_epoch() {
        let signal = ReadySignal::new();
        assert!(!signal.is_ready());
        assert!(signal.resolve());
        assert!(!signal.resolve());
        assert!(signal.is_ready());
        assert_eq!(signal.resolution_count(), 1);

        signal.rearm();
        assert!(!signal.is_ready());
        assert!(signal.resolve());
        assert_eq!(signal.resolution_count(), 2);
    }

    #[test]
    fn test_concurrent_resolve_single_winner() {
        let signal = Arc::new(ReadySignal::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                std::thread::spawn(move || signal.resolve())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(signal.resolution_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_resolve() {
        let signal = Arc::new(ReadySignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        signal.resolve();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_ready() {
        let signal = ReadySignal::new();
        signal.resolve();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already resolved");
    }
}
