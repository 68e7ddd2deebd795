//! Per-round quiet-period countdowns
//!
//! At most one countdown runs per round. Live countdowns sit in an arena
//! keyed by round address; each one owns a tick task and a watchdog task.
//! Both tasks deliver [`ExpiryEvent`]s into one channel drained by the
//! coordinator, and [`RoundTimer::expire`] decides which delivery counts.
//!
//! Every countdown gets a fresh generation number. Events carry the
//! generation they were armed with, so an event from a countdown that was
//! later reset or cancelled is recognised as stale.

use crate::cache::RoundStore;
use crate::clock::Clock;
use crate::config::TimerConfig;
use crate::errors::CacheError;
use crate::metrics::CoordinatorMetrics;
use crate::notifier::{EventPublisher, RoundEvent};
use crate::round::types::{remaining_seconds, RoundTimerState, TimerStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Which producer noticed the countdown ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySource {
    Tick,
    Watchdog,
    /// Found already past its end time at boot
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryEvent {
    pub round_address: String,
    pub generation: u64,
    pub source: ExpirySource,
}

/// How [`RoundTimer::expire`] classified a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDisposition {
    /// First delivery for the live countdown; it is now retired
    Retired,
    /// Second delivery for a countdown already retired
    Duplicate,
    /// The countdown was reset or cancelled after the event was sent
    Stale,
}

impl ExpiryDisposition {
    pub fn should_resolve(self) -> bool {
        !matches!(self, ExpiryDisposition::Stale)
    }
}

/// What `restore` found for a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    NotPersisted,
    AlreadyRunning,
    /// Ticking again from the persisted end time
    Resumed { remaining_ms: u64 },
    /// End time passed while the process was down; expiry already delivered
    Overdue { overdue_ms: u64 },
}

struct ActiveTimer {
    generation: u64,
    state: RoundTimerState,
    cancelled: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveTimer {
    fn stop(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for task in self.tasks {
            task.abort();
        }
    }
}

enum TimerSlot {
    Running(ActiveTimer),
    /// Retired by expiry; kept so a late second delivery is recognised
    Expired {
        generation: u64,
        state: RoundTimerState,
    },
}

#[derive(Clone)]
pub struct RoundTimer {
    store: RoundStore,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    metrics: CoordinatorMetrics,
    slots: Arc<DashMap<String, TimerSlot>>,
    round_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    generations: Arc<AtomicU64>,
    expiry_tx: mpsc::UnboundedSender<ExpiryEvent>,
}

impl RoundTimer {
    pub fn new(
        store: RoundStore,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
        config: TimerConfig,
        metrics: CoordinatorMetrics,
        expiry_tx: mpsc::UnboundedSender<ExpiryEvent>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            config,
            metrics,
            slots: Arc::new(DashMap::new()),
            round_locks: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(1)),
            expiry_tx,
        }
    }

    /// Serializes start/reset/cancel/expire/restore for one round only
    fn round_lock(&self, round_address: &str) -> Arc<Mutex<()>> {
        self.round_locks
            .entry(round_address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn is_running(&self, round_address: &str) -> bool {
        matches!(
            self.slots.get(round_address).as_deref(),
            Some(TimerSlot::Running(_))
        )
    }

    /// Generation of the live countdown, if any
    pub fn generation(&self, round_address: &str) -> Option<u64> {
        match self.slots.get(round_address).as_deref() {
            Some(TimerSlot::Running(active)) => Some(active.generation),
            _ => None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), TimerSlot::Running(_)))
            .count()
    }

    /// State of the countdown that most recently expired for this round
    pub fn last_expired(&self, round_address: &str) -> Option<RoundTimerState> {
        match self.slots.get(round_address).as_deref() {
            Some(TimerSlot::Expired { state, .. }) => Some(state.clone()),
            _ => None,
        }
    }

    /// Begin the quiet period. `Ok(false)` if a countdown is already running
    /// here or another writer left a started marker in the cache.
    pub async fn start(&self, round_address: &str) -> Result<bool, CacheError> {
        let lock = self.round_lock(round_address);
        let _held = lock.lock().await;

        if self.is_running(round_address) {
            debug!(round = %round_address, "Timer already running");
            return Ok(false);
        }
        if self.store.timer_marker_exists(round_address).await? {
            info!(round = %round_address, "Timer already started elsewhere, skipping");
            return Ok(false);
        }

        let state = self.launch(round_address).await?;
        self.publisher
            .publish(RoundEvent::TimerStarted {
                round_address: round_address.to_string(),
                timer: state,
            })
            .await;
        Ok(true)
    }

    /// Restart the quiet period from now with the full duration, replacing
    /// whatever countdown was running.
    pub async fn reset(&self, round_address: &str) -> Result<RoundTimerState, CacheError> {
        let lock = self.round_lock(round_address);
        let _held = lock.lock().await;

        if let Some(previous) = self.take_running(round_address) {
            debug!(round = %round_address, generation = previous.generation, "Replacing countdown");
            previous.stop();
            self.metrics.timer_retired();
        }
        self.store.clear_timer(round_address).await?;

        let state = self.launch(round_address).await?;
        CoordinatorMetrics::incr(&self.metrics.timers_reset);
        self.publisher
            .publish(RoundEvent::TimerReset {
                round_address: round_address.to_string(),
                timer: state.clone(),
            })
            .await;
        self.publisher
            .publish(RoundEvent::TimerStarted {
                round_address: round_address.to_string(),
                timer: state.clone(),
            })
            .await;
        Ok(state)
    }

    /// Stop the countdown and clear its persisted state. `Ok(false)` when
    /// there was nothing to cancel.
    pub async fn cancel(&self, round_address: &str) -> Result<bool, CacheError> {
        let result = self.cancel_locked(round_address).await;
        self.forget(round_address);
        result
    }

    async fn cancel_locked(&self, round_address: &str) -> Result<bool, CacheError> {
        let lock = self.round_lock(round_address);
        let _held = lock.lock().await;

        let stopped = match self.take_running(round_address) {
            Some(active) => {
                active.stop();
                self.metrics.timer_retired();
                true
            }
            None => false,
        };

        if !stopped && !self.store.timer_marker_exists(round_address).await? {
            return Ok(false);
        }

        self.store.clear_timer(round_address).await?;
        self.store.set_round_timer(round_address, None).await?;
        CoordinatorMetrics::incr(&self.metrics.timers_cancelled);
        info!(round = %round_address, "Timer cancelled");

        self.publisher
            .publish(RoundEvent::TimerCancelled {
                round_address: round_address.to_string(),
            })
            .await;
        Ok(true)
    }

    /// Classify an expiry delivery. The first delivery for the live
    /// countdown retires it and clears its persisted state.
    pub async fn expire(&self, round_address: &str, generation: u64) -> Result<ExpiryDisposition, CacheError> {
        let lock = self.round_lock(round_address);
        let _held = lock.lock().await;

        let current = self.slots.get(round_address).map(|slot| match slot.value() {
            TimerSlot::Running(active) => (active.generation, true),
            TimerSlot::Expired { generation, .. } => (*generation, false),
        });

        match current {
            Some((live, true)) if live == generation => {}
            Some((retired, false)) if retired == generation => return Ok(ExpiryDisposition::Duplicate),
            _ => return Ok(ExpiryDisposition::Stale),
        }

        let Some(active) = self.take_running(round_address) else {
            return Ok(ExpiryDisposition::Stale);
        };
        let state = active.state.clone();
        active.stop();
        self.slots.insert(
            round_address.to_string(),
            TimerSlot::Expired { generation, state },
        );
        self.metrics.timer_retired();
        CoordinatorMetrics::incr(&self.metrics.timers_expired);
        info!(round = %round_address, generation, "Timer expired");

        self.store.clear_timer(round_address).await?;
        self.store.set_round_timer(round_address, None).await?;

        self.publisher
            .publish(RoundEvent::TimerExpired {
                round_address: round_address.to_string(),
            })
            .await;
        Ok(ExpiryDisposition::Retired)
    }

    /// Pick up a countdown persisted by a previous process. Remaining time
    /// comes from the persisted end time, not from a fresh duration.
    pub async fn restore(&self, round_address: &str) -> Result<RestoreOutcome, CacheError> {
        let lock = self.round_lock(round_address);
        let _held = lock.lock().await;

        if self.is_running(round_address) {
            return Ok(RestoreOutcome::AlreadyRunning);
        }
        let Some(state) = self.store.load_timer(round_address).await? else {
            return Ok(RestoreOutcome::NotPersisted);
        };

        let now = self.clock.now_ms();
        if state.is_expired(now) {
            let overdue_ms = now.saturating_sub(state.ends_at);
            let generation = self.next_generation();
            self.slots.insert(
                round_address.to_string(),
                TimerSlot::Running(ActiveTimer {
                    generation,
                    state,
                    cancelled: Arc::new(AtomicBool::new(false)),
                    tasks: Vec::new(),
                }),
            );
            self.metrics.timer_armed();
            warn!(round = %round_address, overdue_ms, "Timer ran out while offline, expiring now");
            self.deliver(ExpiryEvent {
                round_address: round_address.to_string(),
                generation,
                source: ExpirySource::Restore,
            });
            return Ok(RestoreOutcome::Overdue { overdue_ms });
        }

        let remaining_ms = state.remaining_ms(now);
        self.store.set_round_timer(round_address, Some(state.clone())).await?;
        let generation = self.arm(state.clone());
        info!(round = %round_address, generation, remaining_ms, "Timer restored");
        self.publisher
            .publish(RoundEvent::TimerStarted {
                round_address: round_address.to_string(),
                timer: state,
            })
            .await;
        Ok(RestoreOutcome::Resumed { remaining_ms })
    }

    /// Remaining time as seen by API consumers. Falls back to the persisted
    /// state for countdowns owned by another process.
    pub async fn status(&self, round_address: &str) -> Result<TimerStatus, CacheError> {
        let live = match self.slots.get(round_address).as_deref() {
            Some(TimerSlot::Running(active)) => Some(active.state.clone()),
            _ => None,
        };
        let state = match live {
            Some(state) => Some(state),
            None => self.store.load_timer(round_address).await?,
        };

        Ok(match state {
            Some(state) => TimerStatus::from_state(state, self.clock.now_ms()),
            None => TimerStatus::idle(round_address),
        })
    }

    /// Drop bookkeeping for a finished round
    pub fn forget(&self, round_address: &str) {
        self.slots
            .remove_if(round_address, |_, slot| matches!(slot, TimerSlot::Expired { .. }));
        self.round_locks
            .remove_if(round_address, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Abort every live countdown without touching persisted state, so a
    /// later process can restore them.
    pub fn shutdown(&self) {
        let addresses: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        for address in addresses {
            if let Some(active) = self.take_running(&address) {
                active.stop();
                self.metrics.timer_retired();
            }
        }
    }

    fn take_running(&self, round_address: &str) -> Option<ActiveTimer> {
        match self
            .slots
            .remove_if(round_address, |_, slot| matches!(slot, TimerSlot::Running(_)))
        {
            Some((_, TimerSlot::Running(active))) => Some(active),
            _ => None,
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst)
    }

    fn deliver(&self, event: ExpiryEvent) {
        if self.expiry_tx.send(event).is_err() {
            warn!("Expiry channel closed, coordinator is gone");
        }
    }

    /// Persist a fresh countdown and arm it
    async fn launch(&self, round_address: &str) -> Result<RoundTimerState, CacheError> {
        let state = RoundTimerState::new(round_address, self.clock.now_ms(), self.config.duration_ms);
        let ttl_secs = self.config.marker_ttl_secs(state.duration_ms);

        self.store.set_timer_marker(round_address, ttl_secs).await?;
        if let Err(e) = self.persist(&state, ttl_secs).await {
            // A marker without a countdown would block every later start
            if let Err(cleanup) = self.store.clear_timer(round_address).await {
                warn!(round = %round_address, "Failed to roll back timer marker: {}", cleanup);
            }
            return Err(e);
        }

        let generation = self.arm(state.clone());
        CoordinatorMetrics::incr(&self.metrics.timers_started);
        info!(
            round = %round_address,
            generation,
            duration_ms = state.duration_ms,
            ends_at = state.ends_at,
            "Timer started"
        );
        Ok(state)
    }

    async fn persist(&self, state: &RoundTimerState, ttl_secs: u64) -> Result<(), CacheError> {
        self.store.save_timer(state, ttl_secs).await?;
        self.store
            .set_round_timer(&state.round_address, Some(state.clone()))
            .await
    }

    /// Spawn the tick and watchdog tasks and register the countdown
    fn arm(&self, state: RoundTimerState) -> u64 {
        let generation = self.next_generation();
        let cancelled = Arc::new(AtomicBool::new(false));
        let remaining_ms = state.remaining_ms(self.clock.now_ms());

        let tasks = vec![
            self.spawn_ticker(&state, generation, cancelled.clone()),
            self.spawn_watchdog(&state.round_address, remaining_ms, generation, cancelled.clone()),
        ];

        let previous = self.slots.insert(
            state.round_address.clone(),
            TimerSlot::Running(ActiveTimer {
                generation,
                state,
                cancelled,
                tasks,
            }),
        );
        if let Some(TimerSlot::Running(previous)) = previous {
            previous.stop();
            self.metrics.timer_retired();
        }
        self.metrics.timer_armed();
        generation
    }

    fn spawn_ticker(&self, state: &RoundTimerState, generation: u64, cancelled: Arc<AtomicBool>) -> JoinHandle<()> {
        let timer = self.clone();
        let round_address = state.round_address.clone();
        let ends_at = state.ends_at;
        let period = self.config.tick_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                let remaining_ms = ends_at.saturating_sub(timer.clock.now_ms());
                if remaining_ms == 0 {
                    timer.deliver(ExpiryEvent {
                        round_address,
                        generation,
                        source: ExpirySource::Tick,
                    });
                    break;
                }

                timer
                    .publisher
                    .publish(RoundEvent::TimerUpdate {
                        round_address: round_address.clone(),
                        remaining_time: remaining_ms,
                        remaining_seconds: remaining_seconds(remaining_ms),
                        ends_at,
                    })
                    .await;
            }
        })
    }

    fn spawn_watchdog(
        &self,
        round_address: &str,
        remaining_ms: u64,
        generation: u64,
        cancelled: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let timer = self.clone();
        let round_address = round_address.to_string();
        let deadline = Duration::from_millis(remaining_ms) + self.config.watchdog_grace();

        tokio::spawn(async move {
            sleep(deadline).await;
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            debug!(round = %round_address, generation, "Watchdog deadline reached");
            timer.deliver(ExpiryEvent {
                round_address,
                generation,
                source: ExpirySource::Watchdog,
            });
        })
    }
}
