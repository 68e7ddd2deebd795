//! Per-round admission for resolution attempts.
//!
//! Process-local only: two coordinator instances sharing one cache are not
//! serialized by this guard.

use dashmap::DashSet;
use std::sync::Arc;

/// Thread-safe set of rounds with a resolution in flight
#[derive(Clone, Default)]
pub struct ResolutionGuard {
    in_flight: Arc<DashSet<String>>,
}

impl ResolutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one attempt for `round_address`. `None` if already held.
    ///
    /// The returned permit releases the round when dropped, so every exit
    /// path of the attempt (success, error, panic unwind) gives it back.
    pub fn try_acquire(&self, round_address: &str) -> Option<ResolutionPermit> {
        if self.in_flight.insert(round_address.to_string()) {
            Some(ResolutionPermit {
                guard: self.clone(),
                round_address: round_address.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, round_address: &str) -> bool {
        self.in_flight.contains(round_address)
    }

    /// Number of attempts currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn release(&self, round_address: &str) {
        self.in_flight.remove(round_address);
    }
}

/// Held for the duration of one resolution attempt
pub struct ResolutionPermit {
    guard: ResolutionGuard,
    round_address: String,
}

impl Drop for ResolutionPermit {
    fn drop(&mut self) {
        self.guard.release(&self.round_address);
    }
}
