//! Per-credential dispatch rate limiting
//!
//! Token bucket per outgoing bot identity. The messaging platform limits
//! each bot separately, so buckets are keyed by credential; acquiring
//! suspends until a token is available rather than dropping the message.
//! Callers bound the wait with their own timeout.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Single token bucket. Time is measured with the tokio clock so tests can
/// pause and advance it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Take one token if available, otherwise report how long until the
    /// next one accrues.
    pub fn try_acquire(&mut self) -> Option<Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return None;
        }
        let deficit = 1.0 - self.tokens;
        Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
    }
}

/// Keyed bucket set shared by the dispatch task.
#[derive(Debug)]
pub struct DispatchLimiter {
    capacity: u32,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl DispatchLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            refill_per_sec: refill_per_sec.max(f64::EPSILON),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Block until the credential's bucket yields a token. The lock is not
    /// held while sleeping, so other credentials proceed independently.
    pub async fn acquire(&self, credential: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(credential.to_string())
                    .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_per_sec));
                bucket.try_acquire()
            };
            match wait {
                None => return,
                Some(wait) => sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity() {
        let mut bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 1.0);
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_some());

        advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(2, 1.0);
        advance(Duration::from_secs(60)).await;
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_none());
        assert!(bucket.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_token() {
        let limiter = DispatchLimiter::new(1, 1.0);
        limiter.acquire("bot-a").await;

        let start = Instant::now();
        // Paused clock: the sleep inside acquire auto-advances time.
        limiter.acquire("bot-a").await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_have_independent_buckets() {
        let limiter = DispatchLimiter::new(1, 0.1);
        limiter.acquire("bot-a").await;

        // bot-b's bucket is untouched: acquires immediately.
        let start = Instant::now();
        limiter.acquire("bot-b").await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
