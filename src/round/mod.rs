//! Round lifecycle: data model, draw, guard, countdowns and the coordinator

pub mod coordinator;
pub mod draw;
pub mod guard;
pub mod timer;
pub mod types;

pub use coordinator::RoundCoordinator;
pub use draw::{draw, select_winner, RandomnessSource, SeededSource, ThreadRngSource};
pub use guard::{ResolutionGuard, ResolutionPermit};
pub use timer::{ExpiryDisposition, ExpiryEvent, ExpirySource, RestoreOutcome, RoundTimer};
pub use types::{
    ResolutionOutcome, Round, RoundStatus, RoundTimerState, SettlementStatus, Stake, TimerStatus,
};
