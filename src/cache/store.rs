//! Typed view over the `StateCache`: round snapshots, players, timer state,
//! and the glue that folds settlement-layer snapshots into the cache.

use super::{
    round_players_key, round_state_key, round_timer_key, round_timer_started_key, StateCache,
    CURRENT_ROUND_KEY,
};
use crate::errors::CacheError;
use crate::round::types::{Round, RoundTimerState, SettlementStatus, Stake};
use crate::settlement::SettlementSnapshot;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const TIMER_MARKER_VALUE: &[u8] = b"true";

/// What a sync did to the cached round
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Snapshot stored; `previous_participants` is the cached count before it
    Applied {
        round: Round,
        previous_participants: usize,
    },
    /// Snapshot would have moved a finished round backwards; cache untouched
    Ignored { cached: Round },
}

impl SyncOutcome {
    pub fn round(&self) -> &Round {
        match self {
            SyncOutcome::Applied { round, .. } => round,
            SyncOutcome::Ignored { cached } => cached,
        }
    }
}

#[derive(Clone)]
pub struct RoundStore {
    cache: Arc<dyn StateCache>,
    round_ttl_secs: u64,
}

impl RoundStore {
    pub fn new(cache: Arc<dyn StateCache>, round_ttl_secs: u64) -> Self {
        Self { cache, round_ttl_secs }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(bytes) = self.cache.get(key).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.cache.set(key, bytes, ttl_secs).await
    }

    pub async fn load_round(&self, round_address: &str) -> Result<Option<Round>, CacheError> {
        self.get_json(&round_state_key(round_address)).await
    }

    /// Store the snapshot and its players list
    pub async fn save_round(&self, round: &Round) -> Result<(), CacheError> {
        self.put_json(&round_state_key(&round.round_address), round, self.round_ttl_secs)
            .await?;
        self.put_json(
            &round_players_key(&round.round_address),
            &round.participants,
            self.round_ttl_secs,
        )
        .await
    }

    pub async fn load_players(&self, round_address: &str) -> Result<Vec<Stake>, CacheError> {
        Ok(self
            .get_json(&round_players_key(round_address))
            .await?
            .unwrap_or_default())
    }

    pub async fn current_round_address(&self) -> Result<Option<String>, CacheError> {
        let Some(bytes) = self.cache.get(CURRENT_ROUND_KEY).await? else {
            return Ok(None);
        };

        String::from_utf8(bytes).map(Some).map_err(|e| CacheError::Decode {
            key: CURRENT_ROUND_KEY.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn current_round(&self) -> Result<Option<Round>, CacheError> {
        match self.current_round_address().await? {
            Some(address) => self.load_round(&address).await,
            None => Ok(None),
        }
    }

    /// Fold a settlement-layer snapshot into the cache.
    ///
    /// Keeps the coordinator-owned timer field and refuses to regress a
    /// finished round.
    pub async fn apply_snapshot(
        &self,
        snapshot: SettlementSnapshot,
        synced_at: u64,
    ) -> Result<SyncOutcome, CacheError> {
        let previous = self.load_round(&snapshot.round_address).await?;
        let mut round = snapshot.into_round(synced_at);

        if let Some(cached) = previous.as_ref() {
            if cached.status.regresses_to(round.status) {
                warn!(
                    round = %round.round_address,
                    cached = %cached.status,
                    observed = %round.status,
                    "Ignoring snapshot that would regress round status"
                );
                return Ok(SyncOutcome::Ignored { cached: cached.clone() });
            }
            if !round.is_resolved() {
                round.timer = cached.timer.clone();
            }
        }

        self.save_round(&round).await?;

        if matches!(
            round.settlement_status,
            SettlementStatus::Initialized | SettlementStatus::Started
        ) {
            self.cache
                .set(
                    CURRENT_ROUND_KEY,
                    round.round_address.clone().into_bytes(),
                    self.round_ttl_secs,
                )
                .await?;
        }

        debug!(
            round = %round.round_address,
            participants = round.participant_count(),
            max = round.max_participants,
            status = %round.settlement_status,
            "Synced round snapshot"
        );

        Ok(SyncOutcome::Applied {
            previous_participants: previous.map(|r| r.participant_count()).unwrap_or(0),
            round,
        })
    }

    /// Write (or clear) the timer embedded in the cached round, if the round is cached
    pub async fn set_round_timer(
        &self,
        round_address: &str,
        timer: Option<RoundTimerState>,
    ) -> Result<(), CacheError> {
        let Some(mut round) = self.load_round(round_address).await? else {
            return Ok(());
        };
        if round.timer == timer {
            return Ok(());
        }
        round.timer = timer;
        self.put_json(&round_state_key(round_address), &round, self.round_ttl_secs)
            .await
    }

    /// Record a confirmed resolution locally, ahead of the next sync
    pub async fn mark_resolved(&self, round_address: &str) -> Result<Option<Round>, CacheError> {
        let Some(mut round) = self.load_round(round_address).await? else {
            return Ok(None);
        };
        round.mark_resolved();
        self.save_round(&round).await?;

        if self.current_round_address().await?.as_deref() == Some(round_address) {
            self.cache.delete(CURRENT_ROUND_KEY).await?;
        }
        Ok(Some(round))
    }

    pub async fn load_timer(&self, round_address: &str) -> Result<Option<RoundTimerState>, CacheError> {
        self.get_json(&round_timer_key(round_address)).await
    }

    pub async fn save_timer(&self, state: &RoundTimerState, ttl_secs: u64) -> Result<(), CacheError> {
        self.put_json(&round_timer_key(&state.round_address), state, ttl_secs)
            .await
    }

    pub async fn timer_marker_exists(&self, round_address: &str) -> Result<bool, CacheError> {
        self.cache.exists(&round_timer_started_key(round_address)).await
    }

    pub async fn set_timer_marker(&self, round_address: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.cache
            .set(
                &round_timer_started_key(round_address),
                TIMER_MARKER_VALUE.to_vec(),
                ttl_secs,
            )
            .await
    }

    /// Delete the started marker and the persisted timer
    pub async fn clear_timer(&self, round_address: &str) -> Result<(), CacheError> {
        let marker_key = round_timer_started_key(round_address);
        let timer_key = round_timer_key(round_address);
        futures::try_join!(self.cache.delete(&marker_key), self.cache.delete(&timer_key))?;
        Ok(())
    }
}
