//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Blaze: HTTP client for the double game feed
//! - Telegram: Bot API dispatch gateway
//! - CLI: Command-line interface handlers

pub mod blaze;
pub mod cli;
pub mod telegram;

pub use blaze::{BlazeFeed, BlazeFeedConfig};
pub use cli::CliApp;
pub use telegram::{DryRunGateway, TelegramGateway};
