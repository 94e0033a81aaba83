//! double-signals - Multi-Room Double Game Signal Bot Library
//!
//! Watches double-game feeds for configured color patterns and drives
//! Telegram signal rooms through gale progressions.
//!
//! # Modules
//!
//! - `domain`: Core state machines (Outcome, Signal, RoomSession, rate limiting)
//! - `ports`: Trait abstractions (FeedClient, DispatchGateway)
//! - `strategy`: Pattern matching and confidence scoring
//! - `adapters`: External implementations (Blaze feed, Telegram, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Multi-room orchestrator

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod strategy;
