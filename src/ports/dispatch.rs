use async_trait::async_trait;
use thiserror::Error;

/// Message delivery error type
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Platform rejected the message: {0}")]
    Rejected(String),

    #[error("Rate limited by the platform (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
}

/// Write side of the messaging platform. `credential` selects the bot
/// identity; the gateway holds no per-room state.
#[async_trait]
pub trait DispatchGateway: Send + Sync {
    /// Send a text message, returning the platform message id when the
    /// platform provides one.
    async fn send_text(
        &self,
        credential: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<Option<i64>, DispatchError>;

    /// Send a sticker by platform reference
    async fn send_sticker(
        &self,
        credential: &str,
        channel_id: &str,
        sticker_ref: &str,
    ) -> Result<Option<i64>, DispatchError>;

    /// Delete a previously sent message. Best-effort cleanup; failures
    /// are logged, not retried.
    async fn delete_message(
        &self,
        credential: &str,
        channel_id: &str,
        message_id: i64,
    ) -> Result<(), DispatchError>;
}
