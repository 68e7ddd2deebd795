//! Wall-clock source for persisted timestamps

use tokio::time::Instant;

/// Milliseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Real time from the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Wall time sampled once, then advanced by the tokio monotonic clock.
///
/// Immune to wall-clock jumps, and follows `tokio::time::pause`/`advance`.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor_ms: u64,
    origin: Instant,
}

impl AnchoredClock {
    pub fn new(anchor_ms: u64) -> Self {
        Self {
            anchor_ms,
            origin: Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms
            .saturating_add(self.origin.elapsed().as_millis() as u64)
    }
}
