//! Multi-room orchestrator
//!
//! Coordinates one poll task per feed, fans new outcomes out to the rooms
//! subscribed to that feed, and funnels every resulting dispatch request
//! through a bounded queue and the per-credential rate limiter. Rooms on
//! the same feed are processed one at a time in registration order, so a
//! slow room delays its siblings but never interleaves their state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::domain::rate_limiter::DispatchLimiter;
use crate::domain::{DispatchRequest, Outcome, RoomSession, RoomStats, TextKind};
use crate::ports::dispatch::DispatchGateway;
use crate::ports::feed::{FeedClient, FeedError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("Unknown feed: {0}")]
    UnknownFeed(String),
    #[error("Feed already registered: {0}")]
    DuplicateFeed(String),
    #[error("Room already registered: {0}")]
    DuplicateRoom(String),
    #[error("Orchestrator is already running")]
    AlreadyRunning,
    #[error("Dispatch queue is closed")]
    QueueClosed,
}

/// Runtime knobs, loaded from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub dispatch_queue_size: usize,
    /// Hard cap on one outgoing platform call
    pub send_timeout: Duration,
    /// How long shutdown keeps draining queued messages
    pub shutdown_grace: Duration,
    /// Messages a credential may burst before refill kicks in
    pub dispatch_burst: u32,
    pub dispatch_per_second: f64,
    pub daily_reset_hour_utc: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            dispatch_queue_size: 256,
            send_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            dispatch_burst: 5,
            dispatch_per_second: 1.0,
            daily_reset_hour_utc: 0,
        }
    }
}

struct FeedInner {
    /// Last successfully fetched window, newest-first
    previous: Vec<Outcome>,
    /// Keyed by room id; processed in insertion order of the Vec below
    rooms: Vec<(String, Arc<Mutex<RoomSession>>)>,
}

struct FeedRuntime {
    client: Arc<dyn FeedClient>,
    inner: Mutex<FeedInner>,
}

/// Owns every feed task and the dispatch queue. Registration happens
/// before `run`; `stop` asks all tasks to finish their current iteration.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    gateway: Arc<dyn DispatchGateway>,
    limiter: DispatchLimiter,
    feeds: std::sync::Mutex<HashMap<String, Arc<FeedRuntime>>>,
    /// room id -> feed id, for duplicate checks and unregistration
    room_index: std::sync::Mutex<HashMap<String, String>>,
    dispatch_tx: mpsc::Sender<DispatchRequest>,
    dispatch_rx: Mutex<Option<mpsc::Receiver<DispatchRequest>>>,
    /// Near-miss alert messages awaiting cleanup, per room:
    /// (credential, channel, platform message id)
    pending_alerts: std::sync::Mutex<HashMap<String, Vec<(String, String, i64)>>>,
    stop_tx: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn DispatchGateway>, settings: OrchestratorSettings) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(settings.dispatch_queue_size.max(1));
        let (stop_tx, _) = watch::channel(false);
        let limiter = DispatchLimiter::new(settings.dispatch_burst, settings.dispatch_per_second);

        Self {
            settings,
            gateway,
            limiter,
            feeds: std::sync::Mutex::new(HashMap::new()),
            room_index: std::sync::Mutex::new(HashMap::new()),
            dispatch_tx,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            pending_alerts: std::sync::Mutex::new(HashMap::new()),
            stop_tx,
        }
    }

    pub fn register_feed(&self, client: Arc<dyn FeedClient>) -> Result<(), OrchestratorError> {
        let feed_id = client.feed_id().to_string();
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        if feeds.contains_key(&feed_id) {
            return Err(OrchestratorError::DuplicateFeed(feed_id));
        }
        feeds.insert(
            feed_id,
            Arc::new(FeedRuntime {
                client,
                inner: Mutex::new(FeedInner {
                    previous: Vec::new(),
                    rooms: Vec::new(),
                }),
            }),
        );
        Ok(())
    }

    /// Attach a room to its configured feed. Rooms can join after the
    /// orchestrator started; they are primed on the next feed tick.
    pub async fn register_room(&self, session: RoomSession) -> Result<(), OrchestratorError> {
        let room_id = session.room_id().to_string();
        let feed_id = session.feed_id().to_string();

        let feed = self.feed_runtime(&feed_id)?;
        {
            let mut index = self.room_index.lock().unwrap_or_else(|e| e.into_inner());
            if index.contains_key(&room_id) {
                return Err(OrchestratorError::DuplicateRoom(room_id));
            }
            index.insert(room_id.clone(), feed_id.clone());
        }

        let mut inner = feed.inner.lock().await;
        inner
            .rooms
            .push((room_id.clone(), Arc::new(Mutex::new(session))));
        tracing::info!("room {} registered on feed {}", room_id, feed_id);
        Ok(())
    }

    /// Detach a room. In-flight signals die with the session; pending
    /// queue entries for it still go out.
    pub async fn unregister_room(&self, room_id: &str) -> bool {
        let feed_id = {
            let mut index = self.room_index.lock().unwrap_or_else(|e| e.into_inner());
            match index.remove(room_id) {
                Some(feed_id) => feed_id,
                None => return false,
            }
        };

        if let Ok(feed) = self.feed_runtime(&feed_id) {
            let mut inner = feed.inner.lock().await;
            inner.rooms.retain(|(id, _)| id != room_id);
        }
        tracing::info!("room {} unregistered", room_id);
        true
    }

    pub async fn room_stats(&self, room_id: &str) -> Option<RoomStats> {
        let feed_id = {
            let index = self.room_index.lock().unwrap_or_else(|e| e.into_inner());
            index.get(room_id).cloned()?
        };
        let feed = self.feed_runtime(&feed_id).ok()?;
        let inner = feed.inner.lock().await;
        let session = inner
            .rooms
            .iter()
            .find(|(id, _)| id == room_id)
            .map(|(_, s)| Arc::clone(s))?;
        drop(inner);
        let stats = session.lock().await.stats();
        Some(stats)
    }

    /// One poll cycle for a feed: fetch, dedup against the previous
    /// window, fan the genuinely new outcomes out to every subscribed
    /// room, and enqueue whatever the rooms want sent. Returns how many
    /// new outcomes were observed.
    pub async fn tick_feed(&self, feed_id: &str) -> Result<usize, OrchestratorError> {
        let feed = self.feed_runtime(feed_id)?;
        let mut inner = feed.inner.lock().await;

        let window = feed.client.fetch_recent().await?;
        if window.is_empty() {
            return Err(FeedError::Empty.into());
        }

        let new = extract_new(feed_id, &inner.previous, &window);
        inner.previous = window.clone();

        let rooms: Vec<_> = inner.rooms.iter().map(|(_, s)| Arc::clone(s)).collect();
        drop(inner);

        let mut requests = Vec::new();
        for session in rooms {
            let mut session = session.lock().await;
            if !session.is_primed() {
                session.seed_history(&window);
                continue;
            }
            if !new.is_empty() {
                requests.extend(session.ingest(&new));
            }
        }

        for request in requests {
            self.dispatch_tx
                .send(request)
                .await
                .map_err(|_| OrchestratorError::QueueClosed)?;
        }

        Ok(new.len())
    }

    /// Run until `stop`. Spawns one poll task per registered feed plus the
    /// daily reset timer, and drives the dispatch queue on this task.
    pub async fn run(self: Arc<Self>) -> Result<(), OrchestratorError> {
        let mut rx = self
            .dispatch_rx
            .lock()
            .await
            .take()
            .ok_or(OrchestratorError::AlreadyRunning)?;

        let feed_ids: Vec<String> = {
            let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
            feeds.keys().cloned().collect()
        };
        tracing::info!(
            "orchestrator starting: {} feed(s), poll every {:?}",
            feed_ids.len(),
            self.settings.poll_interval
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for feed_id in feed_ids {
            handles.push(self.spawn_poll_task(feed_id));
        }
        handles.push(self.spawn_reset_task());

        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(request) => self.dispatch_one(request).await,
                    None => break,
                },
                _ = stop_rx.changed() => break,
            }
        }

        // The poll tasks finish their in-flight iteration after stop and
        // may still enqueue that final tick's messages. Keep consuming
        // until the tasks are done and the queue is empty, bounded by the
        // grace period.
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_grace;
        let wind_down = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        tokio::pin!(wind_down);
        let mut tasks_done = false;
        loop {
            if tasks_done {
                match rx.try_recv() {
                    Ok(request) => self.dispatch_one(request).await,
                    Err(_) => break,
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!("shutdown grace elapsed, dropping queued messages");
                    break;
                }
            } else {
                tokio::select! {
                    maybe = rx.recv() => {
                        if let Some(request) = maybe {
                            self.dispatch_one(request).await;
                        }
                    }
                    _ = &mut wind_down => tasks_done = true,
                    _ = tokio::time::sleep_until(deadline) => {
                        tracing::warn!("shutdown grace elapsed, dropping queued messages");
                        break;
                    }
                }
            }
        }
        tracing::info!("orchestrator stopped");
        Ok(())
    }

    /// Ask every task to finish its current iteration and exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn spawn_poll_task(self: &Arc<Self>, feed_id: String) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }
                match orchestrator.tick_feed(&feed_id).await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("feed {}: {} new outcome(s)", feed_id, n),
                    // A failed poll skips the cycle; the feed retries on
                    // the next interval and rooms keep their state.
                    Err(e) => tracing::warn!("feed {} tick failed: {}", feed_id, e),
                }
                tokio::select! {
                    _ = tokio::time::sleep(orchestrator.settings.poll_interval) => {}
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("feed {} poll task exiting", feed_id);
        })
    }

    fn spawn_reset_task(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let wait = duration_until_hour(Utc::now(), orchestrator.settings.daily_reset_hour_utc);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => orchestrator.reset_all_rooms().await,
                    _ = stop.changed() => break,
                }
            }
        })
    }

    /// Zero daily quotas everywhere, logging each room's closed period.
    pub async fn reset_all_rooms(&self) {
        let feeds: Vec<Arc<FeedRuntime>> = {
            let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
            feeds.values().cloned().collect()
        };
        for feed in feeds {
            let rooms: Vec<_> = {
                let inner = feed.inner.lock().await;
                inner.rooms.clone()
            };
            for (room_id, session) in rooms {
                let stats = session.lock().await.reset_daily();
                tracing::info!(
                    "daily reset for room {}: {} signals, {} wins, {} whites, {} losses, {} alerts",
                    room_id,
                    stats.signals_sent,
                    stats.wins,
                    stats.whites,
                    stats.losses,
                    stats.alerts_sent
                );
            }
        }
    }

    /// Drain the queue inline without running the full loop. No-op once
    /// `run` owns the receiver.
    pub async fn flush_dispatch(&self) {
        let mut guard = self.dispatch_rx.lock().await;
        if let Some(rx) = guard.as_mut() {
            while let Ok(request) = rx.try_recv() {
                self.dispatch_one(request).await;
            }
        }
    }

    async fn dispatch_one(&self, request: DispatchRequest) {
        self.limiter.acquire(request.credential()).await;

        // A confirmed signal supersedes the near-miss alerts that
        // preceded it; clean those up before announcing.
        if let DispatchRequest::Text {
            kind: TextKind::Signal,
            room_id,
            ..
        } = &request
        {
            self.delete_pending_alerts(room_id).await;
        }

        let room_id = request.room_id().to_string();
        let send = async {
            match &request {
                DispatchRequest::Text {
                    credential,
                    channel_id,
                    text,
                    ..
                } => self.gateway.send_text(credential, channel_id, text).await,
                DispatchRequest::Sticker {
                    credential,
                    channel_id,
                    sticker_ref,
                    ..
                } => {
                    self.gateway
                        .send_sticker(credential, channel_id, sticker_ref)
                        .await
                }
            }
        };

        match tokio::time::timeout(self.settings.send_timeout, send).await {
            Ok(Ok(message_id)) => {
                if let (
                    DispatchRequest::Text {
                        kind: TextKind::Alert,
                        room_id,
                        credential,
                        channel_id,
                        ..
                    },
                    Some(id),
                ) = (&request, message_id)
                {
                    let mut alerts = self.pending_alerts.lock().unwrap_or_else(|e| e.into_inner());
                    alerts.entry(room_id.clone()).or_default().push((
                        credential.clone(),
                        channel_id.clone(),
                        id,
                    ));
                }
            }
            // Delivery is at-most-once: a failed send is logged and the
            // message is gone, never re-queued out of order.
            Ok(Err(e)) => tracing::error!("dispatch for room {} failed: {}", room_id, e),
            Err(_) => tracing::error!("dispatch for room {} timed out", room_id),
        }
    }

    /// Best-effort deletion of a room's outstanding alert messages.
    async fn delete_pending_alerts(&self, room_id: &str) {
        let alerts = {
            let mut pending = self.pending_alerts.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(room_id).unwrap_or_default()
        };
        for (credential, channel_id, message_id) in alerts {
            // Deletions count against the platform pacing like any other
            // call on this credential.
            self.limiter.acquire(&credential).await;
            if let Err(e) = self
                .gateway
                .delete_message(&credential, &channel_id, message_id)
                .await
            {
                tracing::debug!(
                    "could not delete alert {} for room {}: {}",
                    message_id,
                    room_id,
                    e
                );
            }
        }
    }

    fn feed_runtime(&self, feed_id: &str) -> Result<Arc<FeedRuntime>, OrchestratorError> {
        let feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds
            .get(feed_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownFeed(feed_id.to_string()))
    }
}

/// Outcomes present in `fetched` but not in `previous`, oldest-first.
/// Both windows are newest-first; the fetched window is aligned by
/// finding where its tail starts repeating the previous head. An empty
/// previous window means this is the priming fetch and nothing is new.
fn extract_new(feed_id: &str, previous: &[Outcome], fetched: &[Outcome]) -> Vec<Outcome> {
    if previous.is_empty() {
        return Vec::new();
    }

    for start in 0..fetched.len() {
        let overlap = (fetched.len() - start).min(previous.len());
        if overlap == 0 {
            break;
        }
        if (0..overlap).all(|j| fetched[start + j].same_draw(&previous[j])) {
            return fetched[..start].iter().rev().cloned().collect();
        }
    }

    // No alignment at all: more draws happened between polls than the
    // window holds. Treat everything as new and flag the gap.
    tracing::warn!(
        "feed {}: no overlap with previous window, possible missed draws",
        feed_id
    );
    fetched.iter().rev().cloned().collect()
}

/// Time until the next occurrence of `hour:00:00` UTC, strictly in the
/// future.
fn duration_until_hour(now: DateTime<Utc>, hour: u32) -> Duration {
    let hour = hour.min(23);
    let today = now.date_naive().and_hms_opt(hour, 0, 0);
    let mut next = match today.map(|t| Utc.from_utc_datetime(&t)) {
        Some(t) => t,
        None => return Duration::from_secs(24 * 3600),
    };
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn outcome(value: i64, id: &str) -> Outcome {
        let at = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        Outcome::new(value, at, Some(id.to_string()))
    }

    #[test]
    fn test_extract_new_priming_yields_nothing() {
        let fetched = vec![outcome(3, "c"), outcome(5, "b"), outcome(0, "a")];
        assert!(extract_new("f", &[], &fetched).is_empty());
    }

    #[test]
    fn test_extract_new_identical_window_is_empty() {
        let window = vec![outcome(3, "c"), outcome(5, "b"), outcome(0, "a")];
        assert!(extract_new("f", &window, &window).is_empty());
    }

    #[test]
    fn test_extract_new_returns_oldest_first() {
        let previous = vec![outcome(3, "c"), outcome(5, "b"), outcome(0, "a")];
        // Two new draws arrived, oldest entries slid out of the window.
        let fetched = vec![outcome(8, "e"), outcome(1, "d"), outcome(3, "c"), outcome(5, "b")];
        let new = extract_new("f", &previous, &fetched);
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].source_id.as_deref(), Some("d"));
        assert_eq!(new[1].source_id.as_deref(), Some("e"));
    }

    #[test]
    fn test_extract_new_no_overlap_takes_everything() {
        let previous = vec![outcome(3, "b"), outcome(5, "a")];
        let fetched = vec![outcome(8, "z"), outcome(1, "y")];
        let new = extract_new("f", &previous, &fetched);
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].source_id.as_deref(), Some("y"));
    }

    #[test]
    fn test_extract_new_matches_by_value_without_ids() {
        let at = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        let previous = vec![Outcome::new(5, at, None), Outcome::new(3, at, None)];
        let fetched = vec![
            Outcome::new(9, at, None),
            Outcome::new(5, at, None),
            Outcome::new(3, at, None),
        ];
        let new = extract_new("f", &previous, &fetched);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].value, 9);
    }

    #[test]
    fn test_duration_until_hour_wraps_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 8, 25, 12, 30, 0).unwrap();
        assert_eq!(
            duration_until_hour(now, 13),
            Duration::from_secs(30 * 60)
        );
        // Noon already passed: wait until tomorrow.
        assert_eq!(
            duration_until_hour(now, 12),
            Duration::from_secs(23 * 3600 + 30 * 60)
        );
    }
}
