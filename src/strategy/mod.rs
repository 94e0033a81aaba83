//! Strategy Layer - Pattern matching and signal admission
//!
//! Strategies describe color/number patterns over the recent draw window.
//! Matching is exact and ordered; a near miss (all but the most recent
//! condition satisfied) drives pre-signal alerts. Matched strategies pass
//! through the confidence scorer before a room commits to a signal.

pub mod pattern;
pub mod scorer;

pub use pattern::{evaluate, MatchResult, Strategy, StrategyError, Token, MAX_CONDITIONS};
pub use scorer::{score, ScoreContext};
