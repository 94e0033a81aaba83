//! Outgoing dispatch requests and message texts
//!
//! Room sessions never touch the network; they return dispatch requests
//! that the orchestrator serializes through the rate limiter. Texts here
//! are the built-in defaults; full template authoring lives outside the
//! core.

use crate::domain::{Color, Outcome};
use crate::strategy::{Strategy, Token};

/// What a text message announces. The dispatcher uses this to clean up
/// stale near-miss alerts once the real signal goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    /// Near-miss pre-alert, deleted when the signal confirms
    Alert,
    /// Signal entry message
    Signal,
    /// Gale progression update
    Progress,
    /// Win / white / loss result
    Result,
}

/// One outgoing message, addressed by room and credential so the
/// orchestrator can rate-limit per bot identity.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchRequest {
    Text {
        room_id: String,
        credential: String,
        channel_id: String,
        kind: TextKind,
        text: String,
    },
    Sticker {
        room_id: String,
        credential: String,
        channel_id: String,
        sticker_ref: String,
    },
}

impl DispatchRequest {
    pub fn room_id(&self) -> &str {
        match self {
            DispatchRequest::Text { room_id, .. } => room_id,
            DispatchRequest::Sticker { room_id, .. } => room_id,
        }
    }

    pub fn credential(&self) -> &str {
        match self {
            DispatchRequest::Text { credential, .. } => credential,
            DispatchRequest::Sticker { credential, .. } => credential,
        }
    }
}

fn bet_label(color: Color) -> String {
    format!("{} {}", color.emoji(), color.to_string().to_uppercase())
}

/// Entry message for a fresh signal
pub fn signal_text(strategy: &Strategy, max_gales: u8, protection: bool) -> String {
    let mut text = format!(
        "\u{1F3AF} *SIGNAL CONFIRMED*\n\n\
         Strategy: {}\n\
         Bet on: {}\n\
         Up to {} gales",
        strategy.name,
        bet_label(strategy.bet_color),
        max_gales,
    );
    if protection {
        text.push_str("\n\u{26AA} White protection on");
    }
    text
}

/// Near-miss alert naming the condition still awaited
pub fn alert_text(strategy: &Strategy, awaited: Token) -> String {
    format!(
        "\u{1F440} *Attention!*\n\n\
         Pattern forming: {}\n\
         Waiting for: {}",
        strategy.name, awaited,
    )
}

pub fn gale_text(level: u8, max_gales: u8) -> String {
    format!(
        "\u{267B}\u{FE0F} Let's go to gale {}/{}",
        level, max_gales,
    )
}

pub fn win_text(outcome: &Outcome) -> String {
    format!(
        "\u{2705} *WIN!* Result: {} {}",
        outcome.value,
        outcome.color.emoji(),
    )
}

pub fn white_text(outcome: &Outcome) -> String {
    format!("\u{26AA} *WHITE!* Protected on {}", outcome.value)
}

pub fn loss_text(outcome: &Outcome) -> String {
    format!(
        "\u{274C} *LOSS.* Result: {} {}",
        outcome.value,
        outcome.color.emoji(),
    )
}
