//! What observers see on the global and per-round channels

mod common;

use common::{settle, HarnessBuilder, RecordingSettlement};
use jackpot::config::NotifierConfig;
use jackpot::notifier::Published;
use jackpot::BroadcastNotifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<Published>) -> Vec<Published> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn on_channel<'a>(messages: &'a [Published], channel: &str) -> Vec<&'a Published> {
    messages.iter().filter(|m| m.channel == channel).collect()
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_on_both_channels() {
    let settlement = Arc::new(RecordingSettlement::new());
    settlement.put_round("r1", &[100, 200], 15);
    let notifier = Arc::new(BroadcastNotifier::new(256));
    let mut rx = notifier.subscribe();
    let h = HarnessBuilder::new()
        .duration_ms(2_500)
        .tick_interval_ms(1_000)
        .settlement(settlement.clone())
        .notifier(notifier.clone())
        .build();

    h.coordinator.join_triggered_sync("r1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    settlement.put_round("r1", &[100, 200, 300], 15);
    h.coordinator.join_triggered_sync("r1").await.unwrap();

    // New countdown ends at 3_700; the tick at 4_200 notices
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    settle().await;
    assert_eq!(settlement.submission_count(), 1);

    let messages = drain(&mut rx);
    let config = NotifierConfig::default();
    let expected = [
        "game-data-synced",
        "timer-started",
        "timer-update",
        "game-data-synced",
        "timer-reset",
        "timer-started",
        "timer-update",
        "timer-update",
        "timer-expired",
        "game-resolved",
    ];

    for channel in [config.global_channel.clone(), config.round_channel("r1")] {
        let seen = on_channel(&messages, &channel);
        let names: Vec<&str> = seen.iter().map(|m| m.event.as_str()).collect();
        assert_eq!(names, expected, "channel {}", channel);

        // Remaining seconds round up: 1_500ms shows as 2, 500ms as 1
        let updates: Vec<(u64, u64)> = seen
            .iter()
            .filter(|m| m.event == "timer-update")
            .map(|m| {
                (
                    m.payload["remainingTime"].as_u64().unwrap(),
                    m.payload["remainingSeconds"].as_u64().unwrap(),
                )
            })
            .collect();
        assert_eq!(updates, vec![(1_500, 2), (1_500, 2), (500, 1)]);

        let resolved = seen.last().unwrap();
        assert_eq!(resolved.payload["type"], "game-resolved");
        assert_eq!(resolved.payload["outcome"]["winnerIdentity"], "player-1");
        assert_eq!(resolved.payload["outcome"]["autoResolved"], true);
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_round_announces_cancellation() {
    let settlement = Arc::new(RecordingSettlement::new());
    settlement.put_round("r1", &[100, 200], 3);
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let mut rx = notifier.subscribe();
    let h = HarnessBuilder::new()
        .settlement(settlement.clone())
        .notifier(notifier.clone())
        .build();

    h.coordinator.join_triggered_sync("r1").await.unwrap();
    settlement.put_round("r1", &[100, 200, 300], 3);
    h.coordinator.join_triggered_sync("r1").await.unwrap();

    let messages = drain(&mut rx);
    let global = on_channel(&messages, &NotifierConfig::default().global_channel);
    let names: Vec<&str> = global.iter().map(|m| m.event.as_str()).collect();
    assert_eq!(
        names,
        vec!["game-data-synced", "timer-started", "game-data-synced", "timer-cancelled"]
    );
    assert_eq!(global[3].payload["roundAddress"], "r1");
}
