//! Room session
//!
//! One Telegram room: its strategy set, its active gale progressions, its
//! daily quotas and its recent-history window. The session is a pure state
//! machine over incoming outcomes; all I/O it wants performed comes back
//! to the caller as dispatch requests.
//!
//! Resolution runs before detection on every draw, so a room with a
//! concurrency cap of 1 never opens a second bet while one is in flight.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::domain::messages::{self, DispatchRequest, TextKind};
use crate::domain::{Outcome, Resolution, Signal};
use crate::strategy::{self, ScoreContext, Strategy};

/// Draws kept for pattern matching; longer than any allowed pattern.
pub const HISTORY_LIMIT: usize = 50;

/// Static per-room settings from configuration
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub room_id: String,
    /// Bot identity used for outgoing messages; opaque to the core
    pub credential: String,
    pub channel_id: String,
    /// Feed this room subscribes to
    pub feed_id: String,
    pub max_gales: u8,
    pub protection: bool,
    /// Minimum scorer result to admit a signal
    pub confidence_threshold: u8,
    pub max_concurrent_signals: usize,
    pub win_sticker: Option<String>,
    pub loss_sticker: Option<String>,
}

/// Daily counters, reported and zeroed on each reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub signals_sent: u32,
    pub alerts_sent: u32,
    pub wins: u32,
    pub whites: u32,
    pub losses: u32,
}

/// Per-room session state. Owned by one orchestrator task at a time.
#[derive(Debug)]
pub struct RoomSession {
    config: RoomConfig,
    /// Active, valid strategies in ascending priority order
    strategies: Vec<Strategy>,
    /// Keyed by signal id; iteration order is creation order
    active_signals: BTreeMap<u64, Signal>,
    /// Signals created per strategy in the current reset period
    daily_count: HashMap<u32, u32>,
    /// Recent outcomes, newest-first
    history: VecDeque<Outcome>,
    last_signal_at: Option<DateTime<Utc>>,
    next_signal_id: u64,
    stats: RoomStats,
    primed: bool,
}

impl RoomSession {
    pub fn new(config: RoomConfig, mut strategies: Vec<Strategy>) -> Self {
        strategies.retain(|s| s.active);
        strategies.sort_by_key(|s| (s.priority, s.id));

        Self {
            config,
            strategies,
            active_signals: BTreeMap::new(),
            daily_count: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            last_signal_at: None,
            next_signal_id: 1,
            stats: RoomStats::default(),
            primed: false,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn feed_id(&self) -> &str {
        &self.config.feed_id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn stats(&self) -> RoomStats {
        self.stats
    }

    pub fn active_signal_count(&self) -> usize {
        self.active_signals.len()
    }

    /// False when every configured strategy failed validation or is
    /// inactive; such a room stays registered but is permanently idle.
    pub fn has_strategies(&self) -> bool {
        !self.strategies.is_empty()
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Load an initial window (newest-first) without resolving or
    /// detecting anything. Called once with the first successful fetch so
    /// stale history never produces signals.
    pub fn seed_history(&mut self, window: &[Outcome]) {
        self.history.clear();
        for outcome in window.iter().take(HISTORY_LIMIT) {
            self.history.push_back(outcome.clone());
        }
        self.primed = true;
        tracing::debug!(
            "room {} primed with {} outcomes",
            self.config.room_id,
            self.history.len()
        );
    }

    /// Feed newly observed outcomes, oldest-first. For each draw, active
    /// progressions resolve before any new signal may be detected.
    pub fn ingest(&mut self, outcomes: &[Outcome]) -> Vec<DispatchRequest> {
        let mut requests = Vec::new();
        for outcome in outcomes {
            self.ingest_one(outcome, &mut requests);
        }
        requests
    }

    /// Zero the daily quotas and counters, returning the closed period's
    /// stats for reporting.
    pub fn reset_daily(&mut self) -> RoomStats {
        self.daily_count.clear();
        std::mem::take(&mut self.stats)
    }

    fn ingest_one(&mut self, outcome: &Outcome, requests: &mut Vec<DispatchRequest>) {
        self.resolve_active(outcome, requests);

        self.history.push_front(outcome.clone());
        self.history.truncate(HISTORY_LIMIT);
        self.primed = true;

        if self.active_signals.len() < self.config.max_concurrent_signals {
            self.detect(outcome.observed_at, requests);
        }
    }

    /// Advance every active progression by this draw, in creation order.
    fn resolve_active(&mut self, outcome: &Outcome, requests: &mut Vec<DispatchRequest>) {
        let mut resolutions = Vec::new();

        for (id, signal) in self.active_signals.iter_mut() {
            let resolution =
                signal.resolve(outcome, self.config.protection, self.config.max_gales);

            match resolution {
                Resolution::Won => {
                    self.stats.wins += 1;
                    tracing::info!(
                        "room {} signal {} WON on {} (gale {})",
                        self.config.room_id,
                        id,
                        outcome.value,
                        signal.gale_level
                    );
                }
                Resolution::Protected => {
                    self.stats.whites += 1;
                    tracing::info!(
                        "room {} signal {} protected by white",
                        self.config.room_id,
                        id
                    );
                }
                Resolution::GaleAdvance(level) => {
                    tracing::info!(
                        "room {} signal {} advancing to gale {}/{}",
                        self.config.room_id,
                        id,
                        level,
                        self.config.max_gales
                    );
                }
                Resolution::Lost => {
                    self.stats.losses += 1;
                    tracing::info!(
                        "room {} signal {} LOST on {}",
                        self.config.room_id,
                        id,
                        outcome.value
                    );
                }
            }

            resolutions.push((*id, resolution, signal.status.is_terminal()));
        }

        for (id, resolution, terminal) in resolutions {
            self.push_resolution_messages(resolution, outcome, requests);
            if terminal {
                self.active_signals.remove(&id);
            }
        }
    }

    fn push_resolution_messages(
        &self,
        resolution: Resolution,
        outcome: &Outcome,
        requests: &mut Vec<DispatchRequest>,
    ) {
        match resolution {
            Resolution::Won => {
                if let Some(sticker) = &self.config.win_sticker {
                    requests.push(self.sticker_request(sticker.clone()));
                }
                requests.push(self.text_request(TextKind::Result, messages::win_text(outcome)));
            }
            Resolution::Protected => {
                requests.push(self.text_request(TextKind::Result, messages::white_text(outcome)));
            }
            Resolution::GaleAdvance(level) => {
                requests.push(self.text_request(
                    TextKind::Progress,
                    messages::gale_text(level, self.config.max_gales),
                ));
            }
            Resolution::Lost => {
                if let Some(sticker) = &self.config.loss_sticker {
                    requests.push(self.sticker_request(sticker.clone()));
                }
                requests.push(self.text_request(TextKind::Result, messages::loss_text(outcome)));
            }
        }
    }

    /// Evaluate strategies in priority order against the current window.
    /// The first full match admitted by the scorer becomes this tick's
    /// single new signal and ends the pass; strategies that near-miss
    /// before that point emit alerts independently.
    fn detect(&mut self, now: DateTime<Utc>, requests: &mut Vec<DispatchRequest>) {
        let window: Vec<Outcome> = self.history.iter().cloned().collect();

        for strategy in &self.strategies {
            // One active progression per strategy; a new match is ignored,
            // not queued.
            if self
                .active_signals
                .values()
                .any(|s| s.strategy_id == strategy.id)
            {
                continue;
            }

            let daily = self.daily_count.get(&strategy.id).copied().unwrap_or(0);
            if daily >= strategy.max_daily_signals {
                tracing::debug!(
                    "room {} strategy '{}' at daily cap ({})",
                    self.config.room_id,
                    strategy.name,
                    strategy.max_daily_signals
                );
                continue;
            }

            let result = strategy::evaluate(strategy, &window);

            if result.full {
                let ctx = ScoreContext {
                    daily_count: daily,
                    recent: &window,
                    last_signal_at: self.last_signal_at,
                };
                let score = strategy::score(strategy, &ctx, now);
                if score < self.config.confidence_threshold {
                    tracing::info!(
                        "room {} strategy '{}' matched but scored {} < {}, discarded",
                        self.config.room_id,
                        strategy.name,
                        score,
                        self.config.confidence_threshold
                    );
                    continue;
                }

                let context: Vec<Outcome> = window
                    .iter()
                    .take(strategy.conditions.len())
                    .cloned()
                    .collect();
                let signal = Signal::new(
                    self.next_signal_id,
                    strategy.id,
                    strategy.bet_color,
                    now,
                    context,
                );
                self.next_signal_id += 1;

                tracing::info!(
                    "room {} signal {} created by '{}' (score {}, bet {})",
                    self.config.room_id,
                    signal.id,
                    strategy.name,
                    score,
                    strategy.bet_color
                );

                requests.push(self.text_request(
                    TextKind::Signal,
                    messages::signal_text(strategy, self.config.max_gales, self.config.protection),
                ));

                self.active_signals.insert(signal.id, signal);
                *self.daily_count.entry(strategy.id).or_insert(0) += 1;
                self.last_signal_at = Some(now);
                self.stats.signals_sent += 1;
                return;
            }

            if result.near_miss {
                tracing::debug!(
                    "room {} strategy '{}' near-miss, alerting",
                    self.config.room_id,
                    strategy.name
                );
                requests.push(self.text_request(
                    TextKind::Alert,
                    messages::alert_text(strategy, strategy.awaited_condition()),
                ));
                self.stats.alerts_sent += 1;
            }
        }
    }

    fn text_request(&self, kind: TextKind, text: String) -> DispatchRequest {
        DispatchRequest::Text {
            room_id: self.config.room_id.clone(),
            credential: self.config.credential.clone(),
            channel_id: self.config.channel_id.clone(),
            kind,
            text,
        }
    }

    fn sticker_request(&self, sticker_ref: String) -> DispatchRequest {
        DispatchRequest::Sticker {
            room_id: self.config.room_id.clone(),
            credential: self.config.credential.clone(),
            channel_id: self.config.channel_id.clone(),
            sticker_ref,
        }
    }
}
