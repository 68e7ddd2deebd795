//! Coordinator counters with Prometheus text export

use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Clone, Default)]
pub struct CoordinatorMetrics {
    pub timers_started: Arc<AtomicU64>,
    pub timers_reset: Arc<AtomicU64>,
    pub timers_cancelled: Arc<AtomicU64>,
    pub timers_expired: Arc<AtomicU64>,
    pub active_timers: Arc<AtomicU64>,

    pub resolutions_succeeded: Arc<AtomicU64>,
    pub resolutions_failed: Arc<AtomicU64>,
    /// Attempts turned away by the guard or because the round was closed
    pub resolutions_skipped: Arc<AtomicU64>,

    pub notifier_failures: Arc<AtomicU64>,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timers_started: u64,
    pub timers_reset: u64,
    pub timers_cancelled: u64,
    pub timers_expired: u64,
    pub active_timers: u64,
    pub resolutions_succeeded: u64,
    pub resolutions_failed: u64,
    pub resolutions_skipped: u64,
    pub notifier_failures: u64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// A countdown began running in this process
    pub(crate) fn timer_armed(&self) {
        Self::incr(&self.active_timers);
    }

    /// A running countdown went away (cancelled, replaced or expired)
    pub(crate) fn timer_retired(&self) {
        let _ = self
            .active_timers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timers_started: self.timers_started.load(Ordering::SeqCst),
            timers_reset: self.timers_reset.load(Ordering::SeqCst),
            timers_cancelled: self.timers_cancelled.load(Ordering::SeqCst),
            timers_expired: self.timers_expired.load(Ordering::SeqCst),
            active_timers: self.active_timers.load(Ordering::SeqCst),
            resolutions_succeeded: self.resolutions_succeeded.load(Ordering::SeqCst),
            resolutions_failed: self.resolutions_failed.load(Ordering::SeqCst),
            resolutions_skipped: self.resolutions_skipped.load(Ordering::SeqCst),
            notifier_failures: self.notifier_failures.load(Ordering::SeqCst),
        }
    }

    /// Render in Prometheus text exposition format
    pub fn to_prometheus_format(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, &str, u64); 9] = [
            ("jackpot_timers_started_total", "counter", "Countdowns started", s.timers_started),
            ("jackpot_timers_reset_total", "counter", "Countdowns restarted by a join", s.timers_reset),
            ("jackpot_timers_cancelled_total", "counter", "Countdowns cancelled", s.timers_cancelled),
            ("jackpot_timers_expired_total", "counter", "Countdowns that reached zero", s.timers_expired),
            ("jackpot_active_timers", "gauge", "Countdowns currently running", s.active_timers),
            ("jackpot_resolutions_succeeded_total", "counter", "Rounds resolved", s.resolutions_succeeded),
            ("jackpot_resolutions_failed_total", "counter", "Resolution attempts that failed", s.resolutions_failed),
            ("jackpot_resolutions_skipped_total", "counter", "Resolution attempts skipped", s.resolutions_skipped),
            ("jackpot_notifier_failures_total", "counter", "Undelivered notifications", s.notifier_failures),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in rows {
            output.push_str(&format!(
                "# HELP {name} {help}\n\
                 # TYPE {name} {kind}\n\
                 {name} {value}\n\n"
            ));
        }
        output
    }
}
