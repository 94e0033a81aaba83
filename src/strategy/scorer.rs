//! Confidence scoring
//!
//! Deterministic 0-100 admission score for a matched strategy. The score
//! starts at the strategy's base confidence and applies contextual
//! adjustments: hour of day, color diversity of the recent window, and
//! spacing since the room's last signal. A room only creates a signal when
//! the score reaches its configured threshold; a rejected match is simply
//! discarded.

use chrono::{DateTime, Timelike, Utc};
use std::collections::HashSet;

use crate::domain::Outcome;
use crate::strategy::Strategy;

/// Inclusive hour range that earns the active-hours bonus
pub const ACTIVE_HOURS: (u32, u32) = (6, 22);
/// Bonus inside active hours
pub const ACTIVE_HOURS_BONUS: i32 = 5;
/// Penalty outside active hours
pub const OFF_HOURS_PENALTY: i32 = -10;
/// How many recent draws feed the diversity bonus
pub const DIVERSITY_WINDOW: usize = 10;
/// Penalty when the room signaled less than this many minutes ago
pub const MIN_SIGNAL_SPACING_MINUTES: i64 = 5;
/// Spacing penalty amount
pub const SPACING_PENALTY: i32 = -15;

/// Room-side context the scorer needs, passed by value so the score is a
/// pure function of its arguments.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    /// Signals this strategy already produced in the current reset period
    pub daily_count: u32,
    /// Recent outcomes, newest-first
    pub recent: &'a [Outcome],
    /// When the room last created a signal, if ever
    pub last_signal_at: Option<DateTime<Utc>>,
}

/// Score a matched strategy. Returns 0 when the strategy is at its daily
/// cap, otherwise the clamped adjusted confidence.
pub fn score(strategy: &Strategy, ctx: &ScoreContext<'_>, now: DateTime<Utc>) -> u8 {
    if ctx.daily_count >= strategy.max_daily_signals {
        return 0;
    }

    let base = strategy.min_confidence as i32;

    let hour = now.hour();
    let time_adjust = if (ACTIVE_HOURS.0..=ACTIVE_HOURS.1).contains(&hour) {
        ACTIVE_HOURS_BONUS
    } else {
        OFF_HOURS_PENALTY
    };

    let diversity_bonus = diversity_bonus(ctx.recent);

    let spacing_penalty = match ctx.last_signal_at {
        Some(last) => {
            let minutes = (now - last).num_minutes();
            if minutes < MIN_SIGNAL_SPACING_MINUTES {
                SPACING_PENALTY
            } else {
                0
            }
        }
        None => 0,
    };

    let total = base + time_adjust + diversity_bonus + spacing_penalty;
    total.clamp(0, 100) as u8
}

/// Distinct colors over the last `DIVERSITY_WINDOW` draws, scaled to 0-10.
/// A monochrome streak scores low, a mixed window scores high.
fn diversity_bonus(recent: &[Outcome]) -> i32 {
    let window = &recent[..recent.len().min(DIVERSITY_WINDOW)];
    if window.is_empty() {
        return 0;
    }
    let distinct: HashSet<_> = window.iter().map(|o| o.color).collect();
    (distinct.len() as f64 / window.len() as f64 * 10.0) as i32
}
