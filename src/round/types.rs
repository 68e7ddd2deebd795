use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache-facing lifecycle status, derived from the settlement status and fill level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting,
    Active,
    Finished,
}

impl RoundStatus {
    /// Position in the one-way lifecycle
    fn rank(self) -> u8 {
        match self {
            RoundStatus::Waiting => 0,
            RoundStatus::Active => 1,
            RoundStatus::Finished => 2,
        }
    }

    /// True when moving to `next` would go backwards
    pub fn regresses_to(self, next: RoundStatus) -> bool {
        next.rank() < self.rank()
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Waiting => write!(f, "waiting"),
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Status as recorded by the settlement layer (source of truth)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Initialized,
    Started,
    Resolved,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Initialized => write!(f, "initialized"),
            SettlementStatus::Started => write!(f, "started"),
            SettlementStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// One participant's wager. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub holder: String,
    /// Minor units, strictly positive
    pub amount: u64,
    pub joined_at: u64,
    /// 1-based join order
    pub position: u32,
    pub asset: String,
}

/// Persisted countdown of a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundTimerState {
    pub round_address: String,
    pub started_at: u64,
    pub ends_at: u64,
    pub duration_ms: u64,
    pub is_active: bool,
}

impl RoundTimerState {
    pub fn new(round_address: &str, started_at: u64, duration_ms: u64) -> Self {
        Self {
            round_address: round_address.to_string(),
            started_at,
            ends_at: started_at.saturating_add(duration_ms),
            duration_ms,
            is_active: true,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.ends_at.saturating_sub(now_ms)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.remaining_ms(now_ms) == 0
    }
}

/// Whole seconds shown to users, rounded up
pub fn remaining_seconds(remaining_ms: u64) -> u64 {
    remaining_ms.div_ceil(1000)
}

/// Latest known snapshot of a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub round_address: String,
    pub nonce: u64,
    pub status: RoundStatus,
    pub settlement_status: SettlementStatus,
    pub max_participants: u32,
    pub max_stake_size: u64,
    pub created_at: u64,
    pub last_synced_at: u64,
    /// Join order
    pub participants: Vec<Stake>,
    pub total_pot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<RoundTimerState>,
}

impl Round {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_resolved(&self) -> bool {
        self.settlement_status == SettlementStatus::Resolved
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants as usize
    }

    /// Waiting or active rounds may run a countdown
    pub fn is_open(&self) -> bool {
        matches!(self.status, RoundStatus::Waiting | RoundStatus::Active)
    }

    /// Derive the cache-facing status
    pub fn derive_status(settlement_status: SettlementStatus, participants: usize) -> RoundStatus {
        match settlement_status {
            SettlementStatus::Resolved => RoundStatus::Finished,
            _ if participants >= 2 => RoundStatus::Active,
            _ => RoundStatus::Waiting,
        }
    }

    pub fn sum_stakes(stakes: &[Stake]) -> u64 {
        stakes.iter().fold(0u64, |acc, s| acc.saturating_add(s.amount))
    }

    /// Mark resolved locally after a confirmed settlement
    pub fn mark_resolved(&mut self) {
        self.settlement_status = SettlementStatus::Resolved;
        self.status = RoundStatus::Finished;
        self.timer = None;
    }
}

/// Result of one successful resolution. Produced at most once per round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub round_address: String,
    pub winner_identity: String,
    pub winner_position: u32,
    pub settlement_reference: String,
    pub participant_count: usize,
    pub total_pot: u64,
    pub auto_resolved: bool,
    pub resolved_at: u64,
}

/// Countdown view for API consumers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub round_address: String,
    pub timer: Option<RoundTimerState>,
    pub remaining_ms: Option<u64>,
    pub remaining_seconds: Option<u64>,
}

impl TimerStatus {
    pub fn idle(round_address: &str) -> Self {
        Self {
            round_address: round_address.to_string(),
            timer: None,
            remaining_ms: None,
            remaining_seconds: None,
        }
    }

    pub fn from_state(state: RoundTimerState, now_ms: u64) -> Self {
        let remaining = state.remaining_ms(now_ms);
        Self {
            round_address: state.round_address.clone(),
            timer: Some(state),
            remaining_ms: Some(remaining),
            remaining_seconds: Some(remaining_seconds(remaining)),
        }
    }
}
