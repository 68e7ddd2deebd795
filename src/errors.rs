//! Error types for the jackpot round coordinator
//!
//! Layered the same way throughout: one root error wrapping per-concern
//! enums, plus the narrower errors returned by the external collaborators.

use thiserror::Error;

/// Root error type for all coordinator operations
#[derive(Debug, Error)]
pub enum JackpotError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Errors raised by a `StateCache` backend or by the typed round store
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache backend failure: {0}")]
    Backend(String),

    #[error("Failed to decode cached value at {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Failed to encode value for {key}: {reason}")]
    Encode { key: String, reason: String },
}

/// Weighted draw input errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("Invalid draw input: {0}")]
    InvalidInput(String),
}

/// Errors reported by the settlement layer
#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    /// On-chain or network rejection
    #[error("Settlement rejected: {0}")]
    Failed(String),

    /// Confirmation did not arrive in time; outcome unknown
    #[error("Settlement confirmation timed out: {0}")]
    Timeout(String),

    #[error("Settlement layer unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by the durable history archive
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    /// Another writer already archived this round
    #[error("History record already exists for round {0}")]
    AlreadyExists(String),

    #[error("History backend failure: {0}")]
    Backend(String),
}

/// Notification delivery failure. Always swallowed by the coordinator.
#[derive(Debug, Clone, Error)]
pub enum NotifierError {
    #[error("Failed to deliver {event} on {channel}: {reason}")]
    Delivery {
        channel: String,
        event: String,
        reason: String,
    },
}

/// Outcome taxonomy of a resolution attempt
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Another trigger holds the guard for this round
    #[error("Resolution already in progress for round {0}")]
    AlreadyInProgress(String),

    /// Round is already resolved or has nobody in it
    #[error("Round {round} cannot be resolved: {reason}")]
    NotResolvable { round: String, reason: String },

    #[error("Round {0} not found in state cache")]
    RoundNotFound(String),

    #[error("Winner draw failed: {0}")]
    Draw(#[from] DrawError),

    #[error("Settlement failed for round {round}: {reason}")]
    SettlementFailed { round: String, reason: String },

    #[error("Settlement timed out for round {round}: {reason}")]
    SettlementTimeout { round: String, reason: String },

    #[error("State cache failure: {0}")]
    Cache(#[from] CacheError),

    #[error("History write failed for round {round}: {reason}")]
    History { round: String, reason: String },
}

impl ResolutionError {
    /// Races and already-closed rounds are expected on the timer path
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            ResolutionError::AlreadyInProgress(_) | ResolutionError::NotResolvable { .. }
        )
    }

    pub(crate) fn from_settlement(round: &str, error: SettlementError) -> Self {
        match error {
            SettlementError::Timeout(reason) => ResolutionError::SettlementTimeout {
                round: round.to_string(),
                reason,
            },
            SettlementError::Failed(reason) | SettlementError::Unavailable(reason) => {
                ResolutionError::SettlementFailed {
                    round: round.to_string(),
                    reason,
                }
            }
        }
    }
}

impl From<rocksdb::Error> for HistoryError {
    fn from(e: rocksdb::Error) -> Self {
        HistoryError::Backend(e.to_string())
    }
}

/// Convenience type alias for Results
pub type JackpotResult<T> = Result<T, JackpotError>;
