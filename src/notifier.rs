//! Real-time event publishing
//!
//! Every lifecycle event goes out twice: on the global channel and on the
//! round's own channel. Delivery is best-effort.

use crate::config::NotifierConfig;
use crate::errors::NotifierError;
use crate::metrics::CoordinatorMetrics;
use crate::round::types::{ResolutionOutcome, Round, RoundTimerState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Lifecycle events carried to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoundEvent {
    #[serde(rename = "timer-started", rename_all = "camelCase")]
    TimerStarted {
        round_address: String,
        timer: RoundTimerState,
    },

    #[serde(rename = "timer-update", rename_all = "camelCase")]
    TimerUpdate {
        round_address: String,
        remaining_time: u64,
        remaining_seconds: u64,
        ends_at: u64,
    },

    #[serde(rename = "timer-reset", rename_all = "camelCase")]
    TimerReset {
        round_address: String,
        timer: RoundTimerState,
    },

    #[serde(rename = "timer-cancelled", rename_all = "camelCase")]
    TimerCancelled { round_address: String },

    #[serde(rename = "timer-expired", rename_all = "camelCase")]
    TimerExpired { round_address: String },

    #[serde(rename = "game-resolved", rename_all = "camelCase")]
    GameResolved { outcome: ResolutionOutcome },

    #[serde(rename = "game-data-synced", rename_all = "camelCase")]
    GameDataSynced { round: Round },
}

impl RoundEvent {
    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::TimerStarted { .. } => "timer-started",
            RoundEvent::TimerUpdate { .. } => "timer-update",
            RoundEvent::TimerReset { .. } => "timer-reset",
            RoundEvent::TimerCancelled { .. } => "timer-cancelled",
            RoundEvent::TimerExpired { .. } => "timer-expired",
            RoundEvent::GameResolved { .. } => "game-resolved",
            RoundEvent::GameDataSynced { .. } => "game-data-synced",
        }
    }

    pub fn round_address(&self) -> &str {
        match self {
            RoundEvent::TimerStarted { round_address, .. }
            | RoundEvent::TimerUpdate { round_address, .. }
            | RoundEvent::TimerReset { round_address, .. }
            | RoundEvent::TimerCancelled { round_address }
            | RoundEvent::TimerExpired { round_address } => round_address,
            RoundEvent::GameResolved { outcome } => &outcome.round_address,
            RoundEvent::GameDataSynced { round } => &round.round_address,
        }
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifierError>;
}

/// One delivered message, as seen by a `BroadcastNotifier` subscriber
#[derive(Debug, Clone)]
pub struct Published {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// In-process notifier on a tokio broadcast channel
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Published>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), NotifierError> {
        let message = Published {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        };

        if let Err(e) = self.tx.send(message) {
            debug!("No subscribers for {} on {}: {}", event, channel, e);
        }
        Ok(())
    }
}

/// Fans a `RoundEvent` out to both channels and swallows failures
#[derive(Clone)]
pub struct EventPublisher {
    notifier: Arc<dyn Notifier>,
    config: NotifierConfig,
    metrics: CoordinatorMetrics,
}

impl EventPublisher {
    pub fn new(notifier: Arc<dyn Notifier>, config: NotifierConfig, metrics: CoordinatorMetrics) -> Self {
        Self {
            notifier,
            config,
            metrics,
        }
    }

    pub async fn publish(&self, event: RoundEvent) {
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.name(), e);
                return;
            }
        };

        let round_channel = self.config.round_channel(event.round_address());
        for channel in [self.config.global_channel.as_str(), round_channel.as_str()] {
            if let Err(e) = self.notifier.publish(channel, event.name(), payload.clone()).await {
                CoordinatorMetrics::incr(&self.metrics.notifier_failures);
                warn!(
                    round = %event.round_address(),
                    event = event.name(),
                    "Notification dropped: {}", e
                );
            }
        }
    }
}
