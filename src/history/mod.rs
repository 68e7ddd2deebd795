//! Durable archive of resolved rounds. At most one record per round.

pub mod rocks;

use crate::errors::HistoryError;
use crate::round::draw::win_probabilities;
use crate::round::types::{ResolutionOutcome, Round};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use rocks::RocksHistoryStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub holder: String,
    pub amount: u64,
    pub asset: String,
    pub joined_at: u64,
    pub position: u32,
    pub is_winner: bool,
    pub win_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    pub outcome: ResolutionOutcome,
    pub nonce: u64,
    pub max_participants: u32,
    pub max_stake_size: u64,
    pub created_at: u64,
    pub timer_started_at: Option<u64>,
    pub timer_ends_at: Option<u64>,
    pub participants: Vec<ParticipantRecord>,
}

impl HistoryRecord {
    /// Build the archive entry from the round as it stood at draw time
    pub fn from_resolution(round: &Round, outcome: &ResolutionOutcome) -> Self {
        let probabilities = win_probabilities(&round.participants);
        let participants = round
            .participants
            .iter()
            .zip(probabilities)
            .map(|(stake, win_probability)| ParticipantRecord {
                holder: stake.holder.clone(),
                amount: stake.amount,
                asset: stake.asset.clone(),
                joined_at: stake.joined_at,
                position: stake.position,
                is_winner: stake.position == outcome.winner_position,
                win_probability,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            outcome: outcome.clone(),
            nonce: round.nonce,
            max_participants: round.max_participants,
            max_stake_size: round.max_stake_size,
            created_at: round.created_at,
            timer_started_at: round.timer.as_ref().map(|t| t.started_at),
            timer_ends_at: round.timer.as_ref().map(|t| t.ends_at),
            participants,
        }
    }

    pub fn round_address(&self) -> &str {
        &self.outcome.round_address
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn exists(&self, round_address: &str) -> Result<bool, HistoryError>;

    /// Fails with `AlreadyExists` if the round is already archived
    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError>;

    async fn get(&self, round_address: &str) -> Result<Option<HistoryRecord>, HistoryError>;
}

/// Process-local archive
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    records: Arc<DashMap<String, HistoryRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn exists(&self, round_address: &str) -> Result<bool, HistoryError> {
        Ok(self.records.contains_key(round_address))
    }

    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        match self.records.entry(record.round_address().to_string()) {
            Entry::Occupied(entry) => Err(HistoryError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, round_address: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        Ok(self.records.get(round_address).map(|r| r.clone()))
    }
}
