//! Orchestrator Integration Tests
//!
//! Verify the full detection pipeline end to end: scripted feed windows
//! flow through dedup, room sessions and the dispatch queue into a
//! recording gateway. All tests are deterministic (no real network calls).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use double_signals::application::{Orchestrator, OrchestratorSettings};
use double_signals::domain::{Outcome, RoomConfig, RoomSession};
use double_signals::ports::feed::{FeedClient, FeedError};
use double_signals::ports::mocks::{RecordingGateway, ScriptedFeed};
use double_signals::strategy::Strategy;

// ============================================================================
// Test Fixtures
// ============================================================================

fn outcome(value: i64, id: &str) -> Outcome {
    // Fixed daytime timestamp keeps the confidence scorer predictable.
    let at = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
    Outcome::new(value, at, Some(id.to_string()))
}

/// Single-condition strategy: signal on a white draw, bet red. With only
/// one condition there is no near-miss prefix, so tests see exactly the
/// signal/result traffic they script.
fn after_white_strategy() -> Strategy {
    Strategy::from_parts(1, "After White", &["W".to_string()], "R", 90, 10, 1, true).unwrap()
}

fn room(room_id: &str, credential: &str, feed_id: &str) -> RoomSession {
    RoomSession::new(
        RoomConfig {
            room_id: room_id.to_string(),
            credential: credential.to_string(),
            channel_id: format!("-100{}", room_id),
            feed_id: feed_id.to_string(),
            max_gales: 2,
            protection: true,
            confidence_threshold: 1,
            max_concurrent_signals: 1,
            win_sticker: None,
            loss_sticker: None,
        },
        vec![after_white_strategy()],
    )
}

/// Three-condition room: near-misses on two reds, confirms on the third.
fn triple_red_session() -> RoomSession {
    let triple_red = Strategy::from_parts(
        1,
        "Triple Red",
        &["R".to_string(), "R".to_string(), "R".to_string()],
        "B",
        90,
        10,
        1,
        true,
    )
    .unwrap();
    RoomSession::new(
        RoomConfig {
            room_id: "vip".to_string(),
            credential: "bot-a".to_string(),
            channel_id: "-100vip".to_string(),
            feed_id: "double".to_string(),
            max_gales: 2,
            protection: true,
            confidence_threshold: 1,
            max_concurrent_signals: 1,
            win_sticker: None,
            loss_sticker: None,
        },
        vec![triple_red],
    )
}

/// Feed windows walking a triple-red room from priming through its
/// near-miss alert to the confirmed signal.
fn alert_then_signal_feed() -> ScriptedFeed {
    ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(3, "b"), outcome(8, "a")])
        .with_window(vec![outcome(5, "c"), outcome(3, "b"), outcome(8, "a")])
        .with_window(vec![
            outcome(7, "d"),
            outcome(5, "c"),
            outcome(3, "b"),
            outcome(8, "a"),
        ])
}

/// Wraps a scripted feed, stalling one fetch to model a poll that is
/// mid-flight when something else happens (e.g. shutdown).
struct StallingFeed {
    inner: ScriptedFeed,
    stall_on_call: u32,
    stall_for: Duration,
    calls: AtomicU32,
}

#[async_trait]
impl FeedClient for StallingFeed {
    fn feed_id(&self) -> &str {
        self.inner.feed_id()
    }

    async fn fetch_recent(&self) -> Result<Vec<Outcome>, FeedError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.stall_on_call {
            tokio::time::sleep(self.stall_for).await;
        }
        self.inner.fetch_recent().await
    }
}

fn settings() -> OrchestratorSettings {
    // Generous burst so tests never wait on the limiter.
    OrchestratorSettings {
        dispatch_burst: 100,
        dispatch_per_second: 100.0,
        ..OrchestratorSettings::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_priming_fetch_produces_no_messages() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    // The very first window already contains a matching draw, but a
    // fresh start must not signal on stale history.
    let feed = ScriptedFeed::new("double").with_window(vec![outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    let new = orchestrator.tick_feed("double").await.unwrap();
    assert_eq!(new, 0);
    orchestrator.flush_dispatch().await;
    assert!(gateway.sent().is_empty());
}

#[tokio::test]
async fn test_signal_then_win_end_to_end() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")])
        .with_window(vec![outcome(3, "c"), outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    orchestrator.tick_feed("double").await.unwrap();
    // White confirms the signal on red.
    assert_eq!(orchestrator.tick_feed("double").await.unwrap(), 1);
    // Red resolves the bet as a win.
    assert_eq!(orchestrator.tick_feed("double").await.unwrap(), 1);

    orchestrator.flush_dispatch().await;
    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("SIGNAL CONFIRMED"));
    assert!(texts[1].contains("WIN"));

    let stats = orchestrator.room_stats("vip").await.unwrap();
    assert_eq!(stats.signals_sent, 1);
    assert_eq!(stats.wins, 1);
}

#[tokio::test]
async fn test_gale_chain_to_loss_end_to_end() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    // White opens a signal on red, then three blacks exhaust both gales.
    // A black-headed window never re-opens the pattern after the loss.
    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")])
        .with_window(vec![outcome(9, "c"), outcome(0, "b"), outcome(8, "a")])
        .with_window(vec![outcome(10, "d"), outcome(9, "c"), outcome(0, "b")])
        .with_window(vec![outcome(12, "e"), outcome(10, "d"), outcome(9, "c")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    for _ in 0..5 {
        orchestrator.tick_feed("double").await.unwrap();
    }
    orchestrator.flush_dispatch().await;

    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 4);
    assert!(texts[0].contains("SIGNAL CONFIRMED"));
    assert!(texts[1].contains("gale 1/2"));
    assert!(texts[2].contains("gale 2/2"));
    assert!(texts[3].contains("LOSS"));

    let stats = orchestrator.room_stats("vip").await.unwrap();
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.signals_sent, 1);
}

#[tokio::test]
async fn test_near_miss_alert_deleted_when_signal_confirms() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    orchestrator
        .register_feed(Arc::new(alert_then_signal_feed()))
        .unwrap();
    orchestrator.register_room(triple_red_session()).await.unwrap();

    for _ in 0..4 {
        orchestrator.tick_feed("double").await.unwrap();
    }
    orchestrator.flush_dispatch().await;

    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("Attention"));
    assert!(texts[1].contains("SIGNAL CONFIRMED"));
    // The pre-alert was cleaned up when the signal went out.
    assert_eq!(gateway.deleted(), vec![1]);
}

#[tokio::test]
async fn test_duplicate_window_is_idempotent() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    let window = vec![outcome(0, "c"), outcome(9, "b"), outcome(8, "a")];
    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(window.clone())
        .with_window(window);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    orchestrator.tick_feed("double").await.unwrap();
    assert_eq!(orchestrator.tick_feed("double").await.unwrap(), 2);
    // Identical window again: nothing new, nothing re-sent.
    assert_eq!(orchestrator.tick_feed("double").await.unwrap(), 0);

    orchestrator.flush_dispatch().await;
    assert_eq!(gateway.sent_texts().len(), 1);
}

#[tokio::test]
async fn test_multi_room_fanout_with_distinct_credentials() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();
    orchestrator.register_room(room("free", "bot-b", "double")).await.unwrap();

    orchestrator.tick_feed("double").await.unwrap();
    orchestrator.tick_feed("double").await.unwrap();
    orchestrator.flush_dispatch().await;

    let sent = gateway.sent();
    assert_eq!(sent.len(), 2);
    // Rooms are processed in registration order, each under its own bot.
    assert_eq!(sent[0].credential, "bot-a");
    assert_eq!(sent[1].credential, "bot-b");
    assert!(sent.iter().all(|m| m.body.contains("SIGNAL CONFIRMED")));
}

#[tokio::test]
async fn test_feed_failure_leaves_other_feeds_running() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    let broken = ScriptedFeed::new("broken").with_error(FeedError::Http("503".into()));
    let healthy = ScriptedFeed::new("healthy")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(broken)).unwrap();
    orchestrator.register_feed(Arc::new(healthy)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "broken")).await.unwrap();
    orchestrator.register_room(room("free", "bot-b", "healthy")).await.unwrap();

    assert!(orchestrator.tick_feed("broken").await.is_err());
    orchestrator.tick_feed("healthy").await.unwrap();
    orchestrator.tick_feed("healthy").await.unwrap();
    orchestrator.flush_dispatch().await;

    let sent = gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].credential, "bot-b");
}

#[tokio::test]
async fn test_unregistered_room_stops_receiving() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway.clone(), settings());

    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    orchestrator.tick_feed("double").await.unwrap();
    assert!(orchestrator.unregister_room("vip").await);
    assert!(!orchestrator.unregister_room("vip").await);

    orchestrator.tick_feed("double").await.unwrap();
    orchestrator.flush_dispatch().await;
    assert!(gateway.sent().is_empty());
    assert!(orchestrator.room_stats("vip").await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_polls_and_stops_cleanly() {
    let gateway = Arc::new(RecordingGateway::new());
    let mut cfg = settings();
    cfg.poll_interval = Duration::from_millis(10);
    let orchestrator = Arc::new(Orchestrator::new(gateway.clone(), cfg));

    let feed = ScriptedFeed::new("double")
        .with_window(vec![outcome(8, "a")])
        .with_window(vec![outcome(0, "b"), outcome(8, "a")]);
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    let runner = tokio::spawn(Arc::clone(&orchestrator).run());

    // Give the poll task time to prime and then deliver the signal.
    tokio::time::sleep(Duration::from_millis(200)).await;
    orchestrator.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run did not stop in time")
        .unwrap()
        .unwrap();

    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("SIGNAL CONFIRMED"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_mid_fetch_still_delivers_final_tick() {
    let gateway = Arc::new(RecordingGateway::new());
    let mut cfg = settings();
    cfg.poll_interval = Duration::from_millis(10);
    let orchestrator = Arc::new(Orchestrator::new(gateway.clone(), cfg));

    // The second fetch stalls long enough for stop to land while it is
    // in flight; the tick it completes during wind-down carries the
    // signal.
    let feed = StallingFeed {
        inner: ScriptedFeed::new("double")
            .with_window(vec![outcome(8, "a")])
            .with_window(vec![outcome(0, "b"), outcome(8, "a")]),
        stall_on_call: 1,
        stall_for: Duration::from_millis(300),
        calls: AtomicU32::new(0),
    };
    orchestrator.register_feed(Arc::new(feed)).unwrap();
    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();

    let runner = tokio::spawn(Arc::clone(&orchestrator).run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run did not stop in time")
        .unwrap()
        .unwrap();

    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("SIGNAL CONFIRMED"));
}

#[tokio::test(start_paused = true)]
async fn test_alert_cleanup_paced_by_rate_limit() {
    let gateway = Arc::new(RecordingGateway::new());
    let mut cfg = settings();
    cfg.dispatch_burst = 1;
    cfg.dispatch_per_second = 1.0;
    let orchestrator = Orchestrator::new(gateway.clone(), cfg);

    orchestrator
        .register_feed(Arc::new(alert_then_signal_feed()))
        .unwrap();
    orchestrator.register_room(triple_red_session()).await.unwrap();

    for _ in 0..4 {
        orchestrator.tick_feed("double").await.unwrap();
    }

    // Burst of one: the alert takes the token, the signal send waits a
    // second, and the alert deletion waits its own second rather than
    // piggybacking on the send.
    let start = tokio::time::Instant::now();
    orchestrator.flush_dispatch().await;
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(4));

    assert_eq!(gateway.deleted(), vec![1]);
    let texts = gateway.sent_texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].contains("SIGNAL CONFIRMED"));
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let gateway = Arc::new(RecordingGateway::new());
    let orchestrator = Orchestrator::new(gateway, settings());

    orchestrator
        .register_feed(Arc::new(ScriptedFeed::new("double")))
        .unwrap();
    assert!(orchestrator
        .register_feed(Arc::new(ScriptedFeed::new("double")))
        .is_err());

    orchestrator.register_room(room("vip", "bot-a", "double")).await.unwrap();
    assert!(orchestrator
        .register_room(room("vip", "bot-a", "double"))
        .await
        .is_err());
    // Unknown feed is rejected up front.
    assert!(orchestrator
        .register_room(room("other", "bot-a", "missing"))
        .await
        .is_err());
}
