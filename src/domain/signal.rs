//! Signal and gale progression
//!
//! A signal is a detected strategy match awaiting resolution. Each newly
//! observed draw resolves it one step: the bet color hitting wins, white
//! with protection enabled is a non-loss, and a genuine miss advances the
//! gale ladder until `max_gales` is exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Color, Outcome};

/// Lifecycle of a signal. `Active` self-loops through gale levels; the
/// other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Won,
    Protected,
    Lost,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalStatus::Active)
    }
}

/// What a single resolution step decided, driving exactly one outgoing
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Won,
    Protected,
    /// Advanced to this gale level, still active
    GaleAdvance(u8),
    Lost,
}

/// A detected strategy match being tracked through its gale progression.
/// Owned exclusively by its room session for its whole lifetime.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: u64,
    pub strategy_id: u32,
    pub bet_color: Color,
    pub created_at: DateTime<Utc>,
    /// The draws that completed the pattern, newest-first, snapshotted at
    /// creation for reporting
    pub context: Vec<Outcome>,
    /// Only increases, never past the room's `max_gales`
    pub gale_level: u8,
    pub status: SignalStatus,
}

impl Signal {
    pub fn new(
        id: u64,
        strategy_id: u32,
        bet_color: Color,
        created_at: DateTime<Utc>,
        context: Vec<Outcome>,
    ) -> Self {
        Self {
            id,
            strategy_id,
            bet_color,
            created_at,
            context,
            gale_level: 0,
            status: SignalStatus::Active,
        }
    }

    /// Consume exactly one new outcome and advance the state machine.
    /// Must be called in arrival order, once per draw, while `Active`.
    pub fn resolve(&mut self, outcome: &Outcome, protection: bool, max_gales: u8) -> Resolution {
        debug_assert_eq!(self.status, SignalStatus::Active);

        if outcome.color == self.bet_color {
            self.status = SignalStatus::Won;
            return Resolution::Won;
        }

        // White protects regardless of the bet color.
        if outcome.color.is_protection() && protection {
            self.status = SignalStatus::Protected;
            return Resolution::Protected;
        }

        if self.gale_level < max_gales {
            self.gale_level += 1;
            return Resolution::GaleAdvance(self.gale_level);
        }

        self.status = SignalStatus::Lost;
        Resolution::Lost
    }
}
