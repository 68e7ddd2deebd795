//! Jackpot - round lifecycle coordinator for a stake-weighted jackpot game
//!
//! Tracks how long each round has gone without a new join, auto-resolves it
//! exactly once when the quiet period runs out, keeps concurrent resolution
//! attempts for one round from overlapping, and draws the winner with
//! probability proportional to stake.

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod history;
pub mod metrics;
pub mod notifier;
pub mod round;
pub mod settlement;

pub use cache::{InMemoryStateCache, RoundStore, StateCache};
pub use clock::{AnchoredClock, Clock, SystemClock};
pub use config::{ConfigLoader, JackpotConfig};
pub use errors::{JackpotError, JackpotResult, ResolutionError};
pub use history::{HistoryRecord, HistoryStore, InMemoryHistoryStore, RocksHistoryStore};
pub use metrics::CoordinatorMetrics;
pub use notifier::{BroadcastNotifier, Notifier, RoundEvent};
pub use round::coordinator::Collaborators;
pub use round::{ResolutionOutcome, Round, RoundCoordinator, RoundStatus, Stake, TimerStatus};
pub use settlement::{SettlementClient, SettlementSnapshot};
