//! Settlement layer interface
//!
//! Transaction construction and signing live behind [`SettlementClient`];
//! the coordinator only reads round snapshots and submits the winner.

use crate::errors::SettlementError;
use crate::round::types::{Round, SettlementStatus, Stake};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stake as reported by the settlement layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStake {
    pub holder: String,
    pub amount: u64,
    pub joined_at: u64,
    pub asset: String,
}

/// Freshly observed state of one round on the settlement layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementSnapshot {
    pub round_address: String,
    pub nonce: u64,
    pub status: SettlementStatus,
    pub max_participants: u32,
    pub max_stake_size: u64,
    pub created_at: u64,
    /// Any order; positions are assigned by join time
    pub stakes: Vec<ObservedStake>,
}

impl SettlementSnapshot {
    /// Build the cache-facing round. Positions follow join order; ties keep
    /// the order the settlement layer reported them in.
    pub fn into_round(self, synced_at: u64) -> Round {
        let mut observed = self.stakes;
        observed.sort_by_key(|s| s.joined_at);

        let participants: Vec<Stake> = observed
            .into_iter()
            .enumerate()
            .map(|(i, s)| Stake {
                holder: s.holder,
                amount: s.amount,
                joined_at: s.joined_at,
                position: (i + 1) as u32,
                asset: s.asset,
            })
            .collect();

        let total_pot = Round::sum_stakes(&participants);
        let status = Round::derive_status(self.status, participants.len());

        Round {
            round_address: self.round_address,
            nonce: self.nonce,
            status,
            settlement_status: self.status,
            max_participants: self.max_participants,
            max_stake_size: self.max_stake_size,
            created_at: self.created_at,
            last_synced_at: synced_at,
            participants,
            total_pot,
            timer: None,
        }
    }
}

/// Settlement layer client
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Read the current state of a round. `None` if the round does not exist.
    async fn fetch_round(&self, round_address: &str) -> Result<Option<SettlementSnapshot>, SettlementError>;

    /// Submit the "declare winner" operation and wait for confirmation.
    /// Returns the settlement reference (e.g. transaction signature).
    async fn submit_resolution(
        &self,
        round_address: &str,
        winner_identity: &str,
        stakes: &[Stake],
    ) -> Result<String, SettlementError>;
}
