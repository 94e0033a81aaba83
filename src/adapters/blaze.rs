//! Blaze double feed
//!
//! HTTP client for the public recent-games endpoint of the double game.
//! Each fetch returns the latest draws newest-first, which is the window
//! orientation the rest of the system expects.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::domain::Outcome;
use crate::ports::feed::{FeedClient, FeedError};

pub const DEFAULT_API_URL: &str = "https://blaze.com/api/roulette_games/recent";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Feed adapter configuration
#[derive(Debug, Clone)]
pub struct BlazeFeedConfig {
    /// Feed identifier rooms subscribe to
    pub feed_id: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for BlazeFeedConfig {
    fn default() -> Self {
        Self {
            feed_id: "blaze-double".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// One draw as the API reports it
#[derive(Debug, Deserialize)]
struct BlazeRoll {
    id: String,
    roll: i64,
    created_at: DateTime<Utc>,
}

/// HTTP feed client for the double game
#[derive(Debug)]
pub struct BlazeFeed {
    config: BlazeFeedConfig,
    http: Client,
}

impl BlazeFeed {
    pub fn new(config: BlazeFeedConfig) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FeedError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    fn to_outcome(&self, roll: BlazeRoll) -> Outcome {
        // Out-of-range values are kept (they classify as white) but noted,
        // since they usually mean the API changed shape.
        if !(0..=14).contains(&roll.roll) {
            tracing::warn!(
                "feed {} returned out-of-range roll {} (id {})",
                self.config.feed_id,
                roll.roll,
                roll.id
            );
        }
        Outcome::new(roll.roll, roll.created_at, Some(roll.id))
    }
}

#[async_trait]
impl FeedClient for BlazeFeed {
    fn feed_id(&self) -> &str {
        &self.config.feed_id
    }

    async fn fetch_recent(&self) -> Result<Vec<Outcome>, FeedError> {
        let response = self
            .http
            .get(&self.config.api_url)
            .send()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http(format!(
                "feed endpoint returned {}",
                status
            )));
        }

        let rolls: Vec<BlazeRoll> = response
            .json()
            .await
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        if rolls.is_empty() {
            return Err(FeedError::Empty);
        }

        Ok(rolls.into_iter().map(|r| self.to_outcome(r)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_api_payload() {
        let body = r#"[
            {"id": "abc", "roll": 7, "created_at": "2026-08-25T12:00:05Z"},
            {"id": "def", "roll": 0, "created_at": "2026-08-25T12:00:00Z"}
        ]"#;
        let rolls: Vec<BlazeRoll> = serde_json::from_str(body).unwrap();
        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[0].id, "abc");
        assert_eq!(rolls[0].roll, 7);
        assert_eq!(rolls[1].roll, 0);
    }

    #[test]
    fn test_roll_becomes_outcome_with_source_id() {
        let feed = BlazeFeed::new(BlazeFeedConfig::default()).unwrap();
        let roll: BlazeRoll =
            serde_json::from_str(r#"{"id": "abc", "roll": 9, "created_at": "2026-08-25T12:00:00Z"}"#)
                .unwrap();
        let outcome = feed.to_outcome(roll);
        assert_eq!(outcome.value, 9);
        assert_eq!(outcome.source_id.as_deref(), Some("abc"));
    }
}
