use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Outcome;

/// Outcome feed error type
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Feed returned an empty window")]
    Empty,
}

/// Read side of a game feed: each fetch returns the most recent draws,
/// newest-first. Implementations do not dedupe; the orchestrator compares
/// consecutive windows itself.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Stable identifier rooms subscribe to
    fn feed_id(&self) -> &str;

    /// Fetch the recent outcome window, newest-first
    async fn fetch_recent(&self) -> Result<Vec<Outcome>, FeedError>;
}
