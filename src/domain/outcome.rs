//! Outcome classification
//!
//! Maps a raw draw value from the feed to its coarse color bucket.
//! Double-style wheels pay red for 1-7, black for 8-14 and white for 0;
//! white doubles as the protection color, so anything outside the known
//! range classifies as white rather than erroring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Color bucket derived from a draw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red,
    Black,
    White,
}

impl Color {
    /// Classify a raw value. Total over i64: out-of-range values map to
    /// White so downstream code never branches on malformed input.
    pub fn from_value(value: i64) -> Self {
        match value {
            1..=7 => Color::Red,
            8..=14 => Color::Black,
            _ => Color::White,
        }
    }

    /// White is the protection color: a white draw is a non-loss for any
    /// bet when the room has protection enabled.
    pub fn is_protection(&self) -> bool {
        matches!(self, Color::White)
    }

    /// Single-letter tag used in strategy condition tokens
    pub fn letter(&self) -> char {
        match self {
            Color::Red => 'R',
            Color::Black => 'B',
            Color::White => 'W',
        }
    }

    /// Emoji for outgoing messages
    pub fn emoji(&self) -> &'static str {
        match self {
            Color::Red => "\u{1F534}",
            Color::Black => "\u{26AB}",
            Color::White => "\u{26AA}",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Red => write!(f, "red"),
            Color::Black => write!(f, "black"),
            Color::White => write!(f, "white"),
        }
    }
}

/// One discrete draw from the outcome feed.
///
/// Immutable once created; produced only by a feed adapter. Batches are
/// ordered newest-first as returned by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Raw drawn value
    pub value: i64,
    /// Color bucket derived from `value`
    pub color: Color,
    /// When the draw was observed
    pub observed_at: DateTime<Utc>,
    /// Opaque per-draw id supplied by the feed adapter, when available
    pub source_id: Option<String>,
}

impl Outcome {
    pub fn new(value: i64, observed_at: DateTime<Utc>, source_id: Option<String>) -> Self {
        Self {
            value,
            color: Color::from_value(value),
            observed_at,
            source_id,
        }
    }

    /// Whether two fetched entries refer to the same draw. Uses the
    /// adapter-supplied id when both sides carry one, otherwise falls back
    /// to value equality (the feed has no stable numeric cursor in all
    /// integrations).
    pub fn same_draw(&self, other: &Outcome) -> bool {
        match (&self.source_id, &other.source_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.value == other.value,
        }
    }
}
