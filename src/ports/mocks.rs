use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::Outcome;
use crate::ports::dispatch::{DispatchError, DispatchGateway};
use crate::ports::feed::{FeedClient, FeedError};

/// Feed that replays a scripted sequence of fetch results. Each call to
/// `fetch_recent` consumes the next entry; an exhausted script reports an
/// empty feed.
#[derive(Debug)]
pub struct ScriptedFeed {
    id: String,
    script: Mutex<VecDeque<Result<Vec<Outcome>, FeedError>>>,
}

impl ScriptedFeed {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Builder method queueing a successful fetch (window newest-first)
    pub fn with_window(self, window: Vec<Outcome>) -> Self {
        self.script.lock().unwrap().push_back(Ok(window));
        self
    }

    /// Builder method queueing a failed fetch
    pub fn with_error(self, error: FeedError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn push_window(&self, window: Vec<Outcome>) {
        self.script.lock().unwrap().push_back(Ok(window));
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedClient for ScriptedFeed {
    fn feed_id(&self) -> &str {
        &self.id
    }

    async fn fetch_recent(&self) -> Result<Vec<Outcome>, FeedError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(FeedError::Empty))
    }
}

/// One message captured by the recording gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub credential: String,
    pub channel_id: String,
    /// Message text, or the sticker reference for sticker sends
    pub body: String,
    pub is_sticker: bool,
}

/// Gateway that records every send and hands out sequential message ids.
/// `fail_sends` makes subsequent sends error, for failure-path tests.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<i64>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.is_sticker)
            .map(|m| m.body.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().unwrap().clone()
    }

    fn record(
        &self,
        credential: &str,
        channel_id: &str,
        body: &str,
        is_sticker: bool,
    ) -> Result<Option<i64>, DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Http("injected failure".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            credential: credential.to_string(),
            channel_id: channel_id.to_string(),
            body: body.to_string(),
            is_sticker,
        });
        Ok(Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[async_trait]
impl DispatchGateway for RecordingGateway {
    async fn send_text(
        &self,
        credential: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<Option<i64>, DispatchError> {
        self.record(credential, channel_id, text, false)
    }

    async fn send_sticker(
        &self,
        credential: &str,
        channel_id: &str,
        sticker_ref: &str,
    ) -> Result<Option<i64>, DispatchError> {
        self.record(credential, channel_id, sticker_ref, true)
    }

    async fn delete_message(
        &self,
        _credential: &str,
        _channel_id: &str,
        message_id: i64,
    ) -> Result<(), DispatchError> {
        self.deleted.lock().unwrap().push(message_id);
        Ok(())
    }
}
