//! Round lifecycle coordinator
//!
//! Turns inbound triggers (join syncs, operator calls, countdown expiry,
//! process boot) into timer transitions and resolutions. Expiry events from
//! every countdown arrive on one channel; each is handled in its own task so
//! duplicate deliveries race on the [`ResolutionGuard`] like any other
//! trigger.

use crate::cache::store::SyncOutcome;
use crate::cache::{RoundStore, StateCache};
use crate::clock::Clock;
use crate::config::JackpotConfig;
use crate::errors::{CacheError, HistoryError, JackpotResult, ResolutionError};
use crate::history::{HistoryRecord, HistoryStore};
use crate::metrics::CoordinatorMetrics;
use crate::notifier::{EventPublisher, Notifier, RoundEvent};
use crate::round::draw::{draw, RandomnessSource};
use crate::round::guard::ResolutionGuard;
use crate::round::timer::{ExpiryDisposition, ExpiryEvent, RestoreOutcome, RoundTimer};
use crate::round::types::{ResolutionOutcome, Round, TimerStatus};
use crate::settlement::SettlementClient;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// External collaborators the coordinator drives
#[derive(Clone)]
pub struct Collaborators {
    pub cache: Arc<dyn StateCache>,
    pub settlement: Arc<dyn SettlementClient>,
    pub history: Arc<dyn HistoryStore>,
    pub notifier: Arc<dyn Notifier>,
    pub randomness: Arc<dyn RandomnessSource>,
    pub clock: Arc<dyn Clock>,
}

pub struct RoundCoordinator {
    store: RoundStore,
    timer: RoundTimer,
    guard: ResolutionGuard,
    settlement: Arc<dyn SettlementClient>,
    history: Arc<dyn HistoryStore>,
    publisher: EventPublisher,
    randomness: Arc<dyn RandomnessSource>,
    clock: Arc<dyn Clock>,
    metrics: CoordinatorMetrics,
}

impl RoundCoordinator {
    /// Build the coordinator and spawn its expiry consumer. Must be called
    /// from within a tokio runtime.
    pub fn new(config: &JackpotConfig, deps: Collaborators) -> Arc<Self> {
        let metrics = CoordinatorMetrics::new();
        let store = RoundStore::new(deps.cache, config.cache.round_ttl_secs);
        let publisher = EventPublisher::new(deps.notifier, config.notifier.clone(), metrics.clone());
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();

        let timer = RoundTimer::new(
            store.clone(),
            publisher.clone(),
            deps.clock.clone(),
            config.timer.clone(),
            metrics.clone(),
            expiry_tx,
        );

        let coordinator = Arc::new(Self {
            store,
            timer,
            guard: ResolutionGuard::new(),
            settlement: deps.settlement,
            history: deps.history,
            publisher,
            randomness: deps.randomness,
            clock: deps.clock,
            metrics,
        });

        Self::spawn_expiry_consumer(Arc::downgrade(&coordinator), expiry_rx);
        coordinator
    }

    fn spawn_expiry_consumer(coordinator: Weak<Self>, mut expiry_rx: mpsc::UnboundedReceiver<ExpiryEvent>) {
        tokio::spawn(async move {
            while let Some(event) = expiry_rx.recv().await {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    coordinator.handle_expiry(event).await;
                });
            }
            debug!("Expiry consumer stopped");
        });
    }

    async fn handle_expiry(&self, event: ExpiryEvent) {
        let round_address = event.round_address.as_str();
        let disposition = match self.timer.expire(round_address, event.generation).await {
            Ok(disposition) => disposition,
            Err(e) => {
                // The countdown is retired before any cache write can fail
                warn!(round = %round_address, "Failed to clear expired timer state: {}", e);
                ExpiryDisposition::Retired
            }
        };

        if !disposition.should_resolve() {
            debug!(
                round = %round_address,
                generation = event.generation,
                source = ?event.source,
                "Dropping stale expiry"
            );
            return;
        }

        match self.resolve(round_address, true).await {
            Ok(outcome) => info!(
                round = %round_address,
                winner = %outcome.winner_identity,
                source = ?event.source,
                "Round auto-resolved"
            ),
            Err(e) if e.is_expected() => info!(round = %round_address, "Auto-resolution skipped: {}", e),
            // Already logged by `resolve`
            Err(_) => {}
        }
    }

    pub fn metrics(&self) -> &CoordinatorMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &RoundStore {
        &self.store
    }

    pub fn timer(&self) -> &RoundTimer {
        &self.timer
    }

    pub fn guard(&self) -> &ResolutionGuard {
        &self.guard
    }

    /// Start the countdown when the second stake arrives, push it back to
    /// the full quiet period on every later join.
    pub async fn on_participant_count_changed(&self, round: &Round) -> Result<(), CacheError> {
        let round_address = round.round_address.as_str();

        if round.participant_count() < 2 || !round.is_open() || round.is_resolved() {
            return Ok(());
        }
        if round.is_full() {
            debug!(round = %round_address, "Round is full, not counting down");
            return Ok(());
        }

        if self.timer.is_running(round_address) {
            let timer = self.timer.reset(round_address).await?;
            info!(
                round = %round_address,
                participants = round.participant_count(),
                ends_at = timer.ends_at,
                "New join, countdown reset"
            );
        } else if self.timer.start(round_address).await? {
            info!(round = %round_address, participants = round.participant_count(), "Countdown started");
        }
        Ok(())
    }

    /// Stop counting down once the round is resolved or closed to new joins.
    /// Returns whether a countdown was cancelled.
    pub async fn on_synced_from_settlement(&self, round: &Round) -> Result<bool, CacheError> {
        let reason = if round.is_resolved() {
            "resolved"
        } else if round.is_full() {
            "full"
        } else {
            return Ok(false);
        };

        let cancelled = self.timer.cancel(&round.round_address).await?;
        if cancelled {
            info!(round = %round.round_address, reason, "Countdown cancelled after sync");
        }
        Ok(cancelled)
    }

    /// Draw, settle, archive and announce. At most one attempt per round runs
    /// at a time; concurrent callers get `AlreadyInProgress`.
    pub async fn resolve(&self, round_address: &str, auto_resolved: bool) -> Result<ResolutionOutcome, ResolutionError> {
        let result = self.admit_and_resolve(round_address, auto_resolved).await;

        match &result {
            Ok(outcome) => {
                CoordinatorMetrics::incr(&self.metrics.resolutions_succeeded);
                info!(
                    round = %round_address,
                    winner = %outcome.winner_identity,
                    reference = %outcome.settlement_reference,
                    total_pot = outcome.total_pot,
                    auto_resolved,
                    "Round resolved"
                );
            }
            Err(e) if e.is_expected() => {
                CoordinatorMetrics::incr(&self.metrics.resolutions_skipped);
                debug!(round = %round_address, "Resolution skipped: {}", e);
            }
            Err(e) => {
                CoordinatorMetrics::incr(&self.metrics.resolutions_failed);
                error!(round = %round_address, auto_resolved, "Resolution failed: {}", e);
            }
        }

        // Terminal for this attempt; a concurrent holder still needs the bookkeeping
        if !matches!(result, Err(ResolutionError::AlreadyInProgress(_))) {
            self.timer.forget(round_address);
        }
        result
    }

    async fn admit_and_resolve(&self, round_address: &str, auto_resolved: bool) -> Result<ResolutionOutcome, ResolutionError> {
        // A resolved round reports NotResolvable even while another attempt holds the guard
        if let Some(round) = self.store.load_round(round_address).await? {
            if round.is_resolved() {
                return Err(not_resolvable(round_address, "already resolved"));
            }
        }

        let Some(_permit) = self.guard.try_acquire(round_address) else {
            return Err(ResolutionError::AlreadyInProgress(round_address.to_string()));
        };

        self.resolve_admitted(round_address, auto_resolved).await
    }

    async fn resolve_admitted(&self, round_address: &str, auto_resolved: bool) -> Result<ResolutionOutcome, ResolutionError> {
        // Re-read: the cache may have changed since the trigger fired
        let mut round = self
            .store
            .load_round(round_address)
            .await?
            .ok_or_else(|| ResolutionError::RoundNotFound(round_address.to_string()))?;

        if round.is_resolved() {
            return Err(not_resolvable(round_address, "already resolved"));
        }
        if round.participants.is_empty() {
            return Err(not_resolvable(round_address, "no participants"));
        }

        if round.timer.is_none() {
            round.timer = self.timer.last_expired(round_address);
        }
        // Cleared before submission so no second expiry can fire
        self.timer.cancel(round_address).await?;

        let winner = draw(&round.participants, self.randomness.as_ref())?.clone();
        info!(
            round = %round_address,
            winner = %winner.holder,
            position = winner.position,
            amount = winner.amount,
            total_pot = round.total_pot,
            "Submitting resolution"
        );

        let settlement_reference = self
            .settlement
            .submit_resolution(round_address, &winner.holder, &round.participants)
            .await
            .map_err(|e| ResolutionError::from_settlement(round_address, e))?;

        let outcome = ResolutionOutcome {
            round_address: round_address.to_string(),
            winner_identity: winner.holder.clone(),
            winner_position: winner.position,
            settlement_reference,
            participant_count: round.participant_count(),
            total_pot: round.total_pot,
            auto_resolved,
            resolved_at: self.clock.now_ms(),
        };

        // Settlement is final at this point; the next sync repairs the cache
        if let Err(e) = self.store.mark_resolved(round_address).await {
            warn!(round = %round_address, "Failed to record resolution in cache: {}", e);
        }

        self.archive(&round, &outcome).await?;
        self.timer.forget(round_address);

        self.publisher
            .publish(RoundEvent::GameResolved {
                outcome: outcome.clone(),
            })
            .await;
        Ok(outcome)
    }

    /// Advisory check-then-insert; another writer winning the race counts as success
    async fn archive(&self, round: &Round, outcome: &ResolutionOutcome) -> Result<(), ResolutionError> {
        let round_address = outcome.round_address.as_str();
        let history_error = |e: HistoryError| ResolutionError::History {
            round: round_address.to_string(),
            reason: e.to_string(),
        };

        if self.history.exists(round_address).await.map_err(history_error)? {
            info!(round = %round_address, "History already recorded, skipping");
            return Ok(());
        }

        match self.history.insert(HistoryRecord::from_resolution(round, outcome)).await {
            Ok(()) => Ok(()),
            Err(HistoryError::AlreadyExists(_)) => {
                info!(round = %round_address, "History written concurrently by another writer");
                Ok(())
            }
            Err(e) => Err(history_error(e)),
        }
    }

    /// Refresh the cache from the settlement layer after a join, then
    /// re-evaluate the countdown. `None` if the round does not exist there.
    pub async fn join_triggered_sync(&self, round_address: &str) -> JackpotResult<Option<Round>> {
        let Some(snapshot) = self.settlement.fetch_round(round_address).await? else {
            warn!(round = %round_address, "Round not found on settlement layer");
            return Ok(None);
        };

        let (round, previous_participants) = match self.store.apply_snapshot(snapshot, self.clock.now_ms()).await? {
            SyncOutcome::Applied {
                round,
                previous_participants,
            } => (round, previous_participants),
            SyncOutcome::Ignored { cached } => return Ok(Some(cached)),
        };

        self.publisher
            .publish(RoundEvent::GameDataSynced { round: round.clone() })
            .await;

        self.on_synced_from_settlement(&round).await?;
        if round.participant_count() > previous_participants {
            self.on_participant_count_changed(&round).await?;
        }

        Ok(self.store.load_round(round_address).await?.or(Some(round)))
    }

    pub async fn manual_resolve(&self, round_address: &str) -> Result<ResolutionOutcome, ResolutionError> {
        self.resolve(round_address, false).await
    }

    pub async fn get_timer_status(&self, round_address: &str) -> Result<TimerStatus, CacheError> {
        self.timer.status(round_address).await
    }

    /// Resume (or immediately expire) the countdown of the current round
    pub async fn restore_on_boot(&self) -> Result<Option<RestoreOutcome>, CacheError> {
        let Some(round) = self.store.current_round().await? else {
            info!("No current round to restore");
            return Ok(None);
        };
        if round.is_resolved() {
            info!(round = %round.round_address, "Current round already resolved, nothing to restore");
            return Ok(None);
        }
        let round_address = round.round_address;

        let outcome = self.timer.restore(&round_address).await?;
        info!(round = %round_address, outcome = ?outcome, "Boot restore finished");
        Ok(Some(outcome))
    }

    /// Stop every countdown in this process; persisted state is kept for the next boot
    pub fn shutdown(&self) {
        self.timer.shutdown();
    }
}

impl Drop for RoundCoordinator {
    fn drop(&mut self) {
        self.timer.shutdown();
    }
}

fn not_resolvable(round_address: &str, reason: &str) -> ResolutionError {
    ResolutionError::NotResolvable {
        round: round_address.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryStateCache;
    use crate::clock::AnchoredClock;
    use crate::errors::SettlementError;
    use crate::history::InMemoryHistoryStore;
    use crate::notifier::BroadcastNotifier;
    use crate::round::draw::SeededSource;
    use crate::round::types::{SettlementStatus, Stake};
    use crate::settlement::{ObservedStake, SettlementSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSettlement {
        snapshot: Mutex<Option<SettlementSnapshot>>,
        submissions: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl SettlementClient for ScriptedSettlement {
        async fn fetch_round(&self, _round_address: &str) -> Result<Option<SettlementSnapshot>, SettlementError> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn submit_resolution(
            &self,
            round_address: &str,
            _winner_identity: &str,
            _stakes: &[Stake],
        ) -> Result<String, SettlementError> {
            if self.reject {
                return Err(SettlementError::Failed("program error".to_string()));
            }
            self.submissions.lock().unwrap().push(round_address.to_string());
            Ok(format!("sig-{}", round_address))
        }
    }

    fn snapshot(holders: usize, max_participants: u32) -> SettlementSnapshot {
        SettlementSnapshot {
            round_address: "r1".to_string(),
            nonce: 1,
            status: SettlementStatus::Started,
            max_participants,
            max_stake_size: 1_000,
            created_at: 0,
            stakes: (0..holders)
                .map(|i| ObservedStake {
                    holder: format!("p{}", i),
                    amount: 100,
                    joined_at: i as u64,
                    asset: "MINT".to_string(),
                })
                .collect(),
        }
    }

    fn coordinator(settlement: Arc<ScriptedSettlement>) -> (Arc<RoundCoordinator>, Arc<InMemoryHistoryStore>) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let deps = Collaborators {
            cache: Arc::new(InMemoryStateCache::new()),
            settlement,
            history: history.clone(),
            notifier: Arc::new(BroadcastNotifier::new(64)),
            randomness: Arc::new(SeededSource::new(7)),
            clock: Arc::new(AnchoredClock::new(1_700_000_000_000)),
        };
        let mut config = JackpotConfig::default();
        config.timer.duration_ms = 5_000;
        (RoundCoordinator::new(&config, deps), history)
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_join_starts_countdown() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, _) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(1, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();
        assert!(!coordinator.timer().is_running("r1"));

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        let round = coordinator.join_triggered_sync("r1").await.unwrap().unwrap();
        assert!(coordinator.timer().is_running("r1"));
        assert!(round.timer.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_count_does_not_reset() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, _) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();
        coordinator.join_triggered_sync("r1").await.unwrap();

        assert_eq!(coordinator.metrics().snapshot().timers_reset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filled_round_cancels_countdown() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, _) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 3));
        coordinator.join_triggered_sync("r1").await.unwrap();
        assert!(coordinator.timer().is_running("r1"));

        *settlement.snapshot.lock().unwrap() = Some(snapshot(3, 3));
        coordinator.join_triggered_sync("r1").await.unwrap();
        assert!(!coordinator.timer().is_running("r1"));
        assert_eq!(coordinator.metrics().snapshot().timers_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_skips_resolved_current_round() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, _) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();
        coordinator.shutdown();

        // Resolved by another writer that left the pointer in place
        let mut round = coordinator.store().load_round("r1").await.unwrap().unwrap();
        round.mark_resolved();
        coordinator.store().save_round(&round).await.unwrap();
        assert_eq!(coordinator.store().current_round_address().await.unwrap().as_deref(), Some("r1"));

        assert_eq!(coordinator.restore_on_boot().await.unwrap(), None);
        assert!(!coordinator.timer().is_running("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_resolve_archives_once() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, history) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();

        let outcome = coordinator.manual_resolve("r1").await.unwrap();
        assert!(!outcome.auto_resolved);
        assert_eq!(outcome.participant_count, 2);
        assert_eq!(outcome.total_pot, 200);
        assert_eq!(history.len(), 1);
        assert!(!coordinator.timer().is_running("r1"));

        let again = coordinator.manual_resolve("r1").await;
        assert!(matches!(again, Err(ResolutionError::NotResolvable { .. })));
        assert_eq!(settlement.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_round_is_not_found() {
        let (coordinator, _) = coordinator(Arc::new(ScriptedSettlement::default()));
        assert!(matches!(
            coordinator.manual_resolve("ghost").await,
            Err(ResolutionError::RoundNotFound(_))
        ));
        assert_eq!(coordinator.guard().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_settlement_leaves_round_open() {
        let settlement = Arc::new(ScriptedSettlement {
            reject: true,
            ..Default::default()
        });
        let (coordinator, history) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();

        let result = coordinator.manual_resolve("r1").await;
        assert!(matches!(result, Err(ResolutionError::SettlementFailed { .. })));

        let round = coordinator.store().load_round("r1").await.unwrap().unwrap();
        assert!(!round.is_resolved());
        assert!(round.timer.is_none());
        assert!(!coordinator.timer().is_running("r1"));
        assert!(history.is_empty());
        assert_eq!(coordinator.guard().in_flight(), 0);
        assert_eq!(coordinator.metrics().snapshot().resolutions_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expiry_auto_resolves() {
        let settlement = Arc::new(ScriptedSettlement::default());
        let (coordinator, history) = coordinator(settlement.clone());

        *settlement.snapshot.lock().unwrap() = Some(snapshot(2, 15));
        coordinator.join_triggered_sync("r1").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(8_000)).await;

        assert_eq!(settlement.submissions.lock().unwrap().len(), 1);
        let record = history.get("r1").await.unwrap().unwrap();
        assert!(record.outcome.auto_resolved);
        assert!(record.timer_ends_at.is_some());
        assert_eq!(coordinator.metrics().snapshot().timers_expired, 1);
    }
}
