//! Pattern matching
//!
//! Evaluates a strategy's ordered condition list against a newest-first
//! window of classified outcomes. Conditions are declared oldest-first:
//! condition 0 checks the oldest relevant draw, the last condition checks
//! the most recent one. A near-miss drops the last condition and re-runs
//! the same alignment, modeling "one draw away from completing".

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{Color, Outcome};

/// Maximum conditions a strategy may declare
pub const MAX_CONDITIONS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("invalid condition token '{0}' (expected X, R, B, W or 0-14)")]
    InvalidToken(String),

    #[error("strategy must have at least one condition")]
    EmptyConditions,

    #[error("strategy has {0} conditions, maximum is {MAX_CONDITIONS}")]
    TooManyConditions(usize),

    #[error("invalid bet color '{0}' (expected R, B or W)")]
    InvalidBetColor(String),
}

/// One condition in a strategy's pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    /// Wildcard, matches any draw
    Any,
    /// Exact value match
    Number(i64),
    /// Color bucket match
    Color(Color),
}

impl Token {
    /// Parse a condition token from its config representation.
    pub fn parse(s: &str) -> Result<Self, StrategyError> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "X" => Ok(Token::Any),
            "R" => Ok(Token::Color(Color::Red)),
            "B" => Ok(Token::Color(Color::Black)),
            "W" => Ok(Token::Color(Color::White)),
            other => match other.parse::<i64>() {
                Ok(n) if (0..=14).contains(&n) => Ok(Token::Number(n)),
                _ => Err(StrategyError::InvalidToken(s.to_string())),
            },
        }
    }

    pub fn matches(&self, outcome: &Outcome) -> bool {
        match self {
            Token::Any => true,
            Token::Number(n) => outcome.value == *n,
            Token::Color(c) => outcome.color == *c,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Any => write!(f, "X"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Color(c) => write!(f, "{}", c.letter()),
        }
    }
}

/// A user-defined sequential pattern with its bet target and limits.
/// Read-only to the core once loaded; editing happens out-of-band and is
/// picked up on the next reload.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub id: u32,
    pub name: String,
    /// Ordered oldest-first
    pub conditions: Vec<Token>,
    pub bet_color: Color,
    /// Base confidence, also the scorer floor
    pub min_confidence: u8,
    /// New signals allowed per daily reset period
    pub max_daily_signals: u32,
    /// Lower evaluates first
    pub priority: u32,
    pub active: bool,
}

impl Strategy {
    /// Build a strategy from config strings, validating every token.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: u32,
        name: &str,
        conditions: &[String],
        bet: &str,
        min_confidence: u8,
        max_daily_signals: u32,
        priority: u32,
        active: bool,
    ) -> Result<Self, StrategyError> {
        if conditions.is_empty() {
            return Err(StrategyError::EmptyConditions);
        }
        if conditions.len() > MAX_CONDITIONS {
            return Err(StrategyError::TooManyConditions(conditions.len()));
        }

        let conditions = conditions
            .iter()
            .map(|s| Token::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let bet_color = match Token::parse(bet)? {
            Token::Color(c) => c,
            _ => return Err(StrategyError::InvalidBetColor(bet.to_string())),
        };

        Ok(Self {
            id,
            name: name.to_string(),
            conditions,
            bet_color,
            min_confidence: min_confidence.min(100),
            max_daily_signals,
            priority,
            active,
        })
    }

    /// The last-declared condition, i.e. the one a near-miss is waiting on.
    pub fn awaited_condition(&self) -> Token {
        *self.conditions.last().unwrap_or(&Token::Any)
    }
}

/// Result of evaluating one strategy against a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    /// All conditions matched
    pub full: bool,
    /// All but the last condition matched against the most recent draws
    pub near_miss: bool,
}

/// Check `conditions` (oldest-first) against `window` (newest-first).
/// Condition i is aligned with `window[n-1-i]`. A short window is "not
/// yet", not an error.
fn matches_aligned(conditions: &[Token], window: &[Outcome]) -> bool {
    let n = conditions.len();
    if n == 0 || window.len() < n {
        return false;
    }
    conditions
        .iter()
        .enumerate()
        .all(|(i, c)| c.matches(&window[n - 1 - i]))
}

/// Evaluate both the full pattern and its near-miss variant. The caller
/// decides precedence; a near-miss needs at least two conditions and a
/// window long enough to hold the whole pattern, so a freshly primed
/// room never alerts off a truncated history.
pub fn evaluate(strategy: &Strategy, window: &[Outcome]) -> MatchResult {
    let conditions = &strategy.conditions;
    if window.len() < conditions.len() {
        return MatchResult {
            full: false,
            near_miss: false,
        };
    }

    let full = matches_aligned(conditions, window);
    let near_miss = conditions.len() > 1
        && matches_aligned(&conditions[..conditions.len() - 1], window);

    MatchResult { full, near_miss }
}
