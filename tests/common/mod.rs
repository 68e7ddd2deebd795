//! Shared fixtures for the coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use jackpot::errors::{NotifierError, SettlementError};
use jackpot::round::draw::RandomnessSource;
use jackpot::round::types::{SettlementStatus, Stake};
use jackpot::settlement::{ObservedStake, SettlementClient, SettlementSnapshot};
use jackpot::{
    AnchoredClock, BroadcastNotifier, Collaborators, InMemoryHistoryStore, InMemoryStateCache, JackpotConfig,
    Notifier, RoundCoordinator,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ANCHOR_MS: u64 = 1_700_000_000_000;

/// How the fake settlement layer answers `submit_resolution`
#[derive(Clone, Copy, Debug)]
pub enum SubmitBehaviour {
    Confirm,
    Reject,
    TimeOut,
}

/// Settlement layer that records every submission
pub struct RecordingSettlement {
    rounds: Mutex<HashMap<String, SettlementSnapshot>>,
    submissions: Mutex<Vec<(String, String)>>,
    behaviour: Mutex<SubmitBehaviour>,
    confirm_delay: Duration,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Confirmation takes `delay`, keeping the resolution in flight meanwhile
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            rounds: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            behaviour: Mutex::new(SubmitBehaviour::Confirm),
            confirm_delay: delay,
        }
    }

    pub fn set_behaviour(&self, behaviour: SubmitBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// Publish a round with `amounts` staked, in join order
    pub fn put_round(&self, round_address: &str, amounts: &[u64], max_participants: u32) {
        let stakes = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| ObservedStake {
                holder: format!("player-{}", i + 1),
                amount: *amount,
                joined_at: ANCHOR_MS + i as u64,
                asset: "MINT".to_string(),
            })
            .collect();

        let snapshot = SettlementSnapshot {
            round_address: round_address.to_string(),
            nonce: 1,
            status: SettlementStatus::Started,
            max_participants,
            max_stake_size: 10_000_000,
            created_at: ANCHOR_MS,
            stakes,
        };
        self.rounds
            .lock()
            .unwrap()
            .insert(round_address.to_string(), snapshot);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn winners(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, winner)| winner.clone())
            .collect()
    }
}

#[async_trait]
impl SettlementClient for RecordingSettlement {
    async fn fetch_round(&self, round_address: &str) -> Result<Option<SettlementSnapshot>, SettlementError> {
        Ok(self.rounds.lock().unwrap().get(round_address).cloned())
    }

    async fn submit_resolution(
        &self,
        round_address: &str,
        winner_identity: &str,
        _stakes: &[Stake],
    ) -> Result<String, SettlementError> {
        self.submissions
            .lock()
            .unwrap()
            .push((round_address.to_string(), winner_identity.to_string()));

        if !self.confirm_delay.is_zero() {
            tokio::time::sleep(self.confirm_delay).await;
        }

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            SubmitBehaviour::Confirm => {
                if let Some(round) = self.rounds.lock().unwrap().get_mut(round_address) {
                    round.status = SettlementStatus::Resolved;
                }
                Ok(format!("sig-{}", round_address))
            }
            SubmitBehaviour::Reject => Err(SettlementError::Failed("custom program error".to_string())),
            SubmitBehaviour::TimeOut => Err(SettlementError::Timeout("no confirmation".to_string())),
        }
    }
}

/// Notifier whose transport is always down
#[derive(Default)]
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn publish(&self, channel: &str, event: &str, _payload: Value) -> Result<(), NotifierError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifierError::Delivery {
            channel: channel.to_string(),
            event: event.to_string(),
            reason: "broker unreachable".to_string(),
        })
    }
}

/// Always draws the same value
pub struct FixedRandomness(pub u128);

impl RandomnessSource for FixedRandomness {
    fn draw_below(&self, upper: u128) -> u128 {
        self.0.min(upper - 1)
    }
}

pub struct Harness {
    pub coordinator: Arc<RoundCoordinator>,
    pub settlement: Arc<RecordingSettlement>,
    pub history: Arc<InMemoryHistoryStore>,
    pub cache: Arc<InMemoryStateCache>,
    pub clock: AnchoredClock,
}

pub struct HarnessBuilder {
    config: JackpotConfig,
    settlement: Arc<RecordingSettlement>,
    cache: Arc<InMemoryStateCache>,
    notifier: Arc<dyn Notifier>,
    randomness: Arc<dyn RandomnessSource>,
    anchor_ms: u64,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let mut config = JackpotConfig::default();
        config.timer.duration_ms = 5_000;

        Self {
            config,
            settlement: Arc::new(RecordingSettlement::new()),
            cache: Arc::new(InMemoryStateCache::new()),
            notifier: Arc::new(BroadcastNotifier::new(256)),
            randomness: Arc::new(FixedRandomness(0)),
            anchor_ms: ANCHOR_MS,
        }
    }

    /// Wall time at build, so a restarted harness continues the previous clock
    pub fn anchor_ms(mut self, anchor_ms: u64) -> Self {
        self.anchor_ms = anchor_ms;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.config.timer.duration_ms = duration_ms;
        self
    }

    pub fn tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.config.timer.tick_interval_ms = tick_interval_ms;
        self
    }

    pub fn settlement(mut self, settlement: Arc<RecordingSettlement>) -> Self {
        self.settlement = settlement;
        self
    }

    /// Share a cache with a previous harness, as after a process restart
    pub fn cache(mut self, cache: Arc<InMemoryStateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn randomness(mut self, randomness: Arc<dyn RandomnessSource>) -> Self {
        self.randomness = randomness;
        self
    }

    pub fn build(self) -> Harness {
        let clock = AnchoredClock::new(self.anchor_ms);
        let history = Arc::new(InMemoryHistoryStore::new());
        let deps = Collaborators {
            cache: self.cache.clone(),
            settlement: self.settlement.clone(),
            history: history.clone(),
            notifier: self.notifier,
            randomness: self.randomness,
            clock: Arc::new(clock),
        };

        Harness {
            coordinator: RoundCoordinator::new(&self.config, deps),
            settlement: self.settlement,
            history,
            cache: self.cache,
            clock,
        }
    }
}

/// Let spawned tasks run until idle. Moves the paused clock by 1ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
