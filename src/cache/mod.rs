//! Shared TTL key/value cache holding round snapshots and timer state
//!
//! The cache is the system of record for round snapshots and is written by
//! other producers too (last write wins per key). Values are raw bytes; the
//! typed view lives in [`store::RoundStore`].

pub mod memory;
pub mod store;

use crate::errors::CacheError;
use async_trait::async_trait;

pub use memory::InMemoryStateCache;
pub use store::RoundStore;

pub const CURRENT_ROUND_KEY: &str = "current_game";
pub const ROUND_STATE_PREFIX: &str = "game_state:";
pub const ROUND_PLAYERS_PREFIX: &str = "game_players:";
pub const ROUND_TIMER_PREFIX: &str = "game_timer:";
pub const ROUND_TIMER_STARTED_PREFIX: &str = "game_timer_started:";

pub fn round_state_key(round_address: &str) -> String {
    format!("{}{}", ROUND_STATE_PREFIX, round_address)
}

pub fn round_players_key(round_address: &str) -> String {
    format!("{}{}", ROUND_PLAYERS_PREFIX, round_address)
}

pub fn round_timer_key(round_address: &str) -> String {
    format!("{}{}", ROUND_TIMER_PREFIX, round_address)
}

pub fn round_timer_started_key(round_address: &str) -> String {
    format!("{}{}", ROUND_TIMER_STARTED_PREFIX, round_address)
}

/// Minimal TTL key/value interface
#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}
