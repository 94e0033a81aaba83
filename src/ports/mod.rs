//! Ports Layer - Trait definitions for external dependencies
//!
//! Interfaces the adapters implement. Following hexagonal architecture,
//! these traits abstract:
//! - Game outcome feeds (recent draw windows)
//! - Message dispatch (texts, stickers, deletions)

pub mod dispatch;
pub mod feed;
pub mod mocks;

pub use dispatch::{DispatchError, DispatchGateway};
pub use feed::{FeedClient, FeedError};
