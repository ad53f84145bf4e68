//! Engine state held in a watch channel
//!
//! Every transition is validated against the state table; subscribers see
//! each committed state through [`StateMachine::subscribe`].

use crate::player::SyncState;
use crate::utils::error::{Result, SyncError};
use tokio::sync::watch;

/// Validated state holder
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<SyncState>,
}

impl StateMachine {
    /// Start in Loading
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncState::Loading);
        Self { tx }
    }

    pub fn current(&self) -> SyncState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Move to `next`; returns the state left
    pub fn transition(&self, next: SyncState) -> Result<SyncState> {
        let mut outcome = Err(SyncError::InvalidState(String::new()));
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                outcome = Ok(*state);
                *state = next;
                true
            } else {
                outcome = Err(SyncError::InvalidState(format!("cannot go from {} to {}", state, next)));
                false
            }
        });

        if let Ok(previous) = &outcome {
            log::info!("State changed: {} -> {}", previous, next);
        }
        outcome
    }

    /// Move to Stopped from anywhere
    ///
    /// Returns the state left, or `None` when already stopped.
    pub fn force_stop(&self) -> Option<SyncState> {
        let previous = self.tx.send_replace(SyncState::Stopped);
        if previous == SyncState::Stopped {
            return None;
        }
        log::info!("State changed: {} -> {}", previous, SyncState::Stopped);
        Some(previous)
    }

    pub fn is_stopped(&self) -> bool {
        self.current() == SyncState::Stopped
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
