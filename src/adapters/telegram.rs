//! Telegram dispatch gateway
//!
//! Bot API client implementing the dispatch port. The credential is the
//! bot token; one gateway instance serves every room, since the per-bot
//! rate limiting happens upstream in the dispatch queue. A 429 from the
//! platform is honored once per send using the advertised retry delay.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::ports::dispatch::{DispatchError, DispatchGateway};

pub const API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// Cap on how long a platform-requested retry delay is honored
pub const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<MessageResult>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Bot API gateway
#[derive(Debug)]
pub struct TelegramGateway {
    base_url: String,
    http: Client,
}

impl TelegramGateway {
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_base_url(API_BASE_URL)
    }

    /// Point at a different API host, used by tests
    pub fn with_base_url(base_url: &str) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DispatchError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, token, method)
    }

    async fn call(
        &self,
        token: &str,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<ApiResponse, DispatchError> {
        let response = self
            .http
            .post(self.method_url(token, method))
            .json(payload)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Http(format!("unparseable response: {}", e)))?;

        if body.ok {
            return Ok(body);
        }

        if status.as_u16() == 429 {
            let retry_after_secs = body
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(1)
                .min(MAX_RETRY_AFTER_SECS);
            return Err(DispatchError::RateLimited { retry_after_secs });
        }

        Err(DispatchError::Rejected(
            body.description.unwrap_or_else(|| status.to_string()),
        ))
    }

    /// Call the API, sleeping through one platform-requested retry.
    async fn call_with_retry(
        &self,
        token: &str,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<ApiResponse, DispatchError> {
        match self.call(token, method, payload).await {
            Err(DispatchError::RateLimited { retry_after_secs }) => {
                tracing::warn!(
                    "platform rate limit on {}, retrying in {}s",
                    method,
                    retry_after_secs
                );
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                self.call(token, method, payload).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl DispatchGateway for TelegramGateway {
    async fn send_text(
        &self,
        credential: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<Option<i64>, DispatchError> {
        let payload = json!({
            "chat_id": channel_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        let response = self.call_with_retry(credential, "sendMessage", &payload).await?;
        Ok(response.result.map(|r| r.message_id))
    }

    async fn send_sticker(
        &self,
        credential: &str,
        channel_id: &str,
        sticker_ref: &str,
    ) -> Result<Option<i64>, DispatchError> {
        let payload = json!({
            "chat_id": channel_id,
            "sticker": sticker_ref,
        });
        let response = self.call_with_retry(credential, "sendSticker", &payload).await?;
        Ok(response.result.map(|r| r.message_id))
    }

    async fn delete_message(
        &self,
        credential: &str,
        channel_id: &str,
        message_id: i64,
    ) -> Result<(), DispatchError> {
        let payload = json!({
            "chat_id": channel_id,
            "message_id": message_id,
        });
        self.call(credential, "deleteMessage", &payload).await?;
        Ok(())
    }
}

/// Gateway that logs instead of sending, for `--dry-run`
#[derive(Debug, Default)]
pub struct DryRunGateway;

#[async_trait]
impl DispatchGateway for DryRunGateway {
    async fn send_text(
        &self,
        _credential: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<Option<i64>, DispatchError> {
        tracing::info!("[dry-run] text to {}: {}", channel_id, text.replace('\n', " | "));
        Ok(None)
    }

    async fn send_sticker(
        &self,
        _credential: &str,
        channel_id: &str,
        sticker_ref: &str,
    ) -> Result<Option<i64>, DispatchError> {
        tracing::info!("[dry-run] sticker to {}: {}", channel_id, sticker_ref);
        Ok(None)
    }

    async fn delete_message(
        &self,
        _credential: &str,
        channel_id: &str,
        message_id: i64,
    ) -> Result<(), DispatchError> {
        tracing::info!("[dry-run] delete {} in {}", message_id, channel_id);
        Ok(())
    }
}
