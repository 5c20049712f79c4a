//! Token Bucket
//!
//! Fractional token bucket. Tokens never exceed capacity and refill in
//! proportion to elapsed time.

use std::time::{Duration, Instant};

/// Slack for float rounding when comparing against one whole token
const EPSILON: f64 = 1e-9;

/// A single source's bucket
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current tokens, in `[0, capacity]`
    tokens: f64,

    /// Maximum tokens (burst capacity)
    capacity: f64,

    /// Time for one token to refill
    refill_interval: Duration,

    /// Last refill timestamp
    last_refill: Instant,

    /// Last time the bucket was consulted
    last_seen: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: u32, refill_interval: Duration, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_interval,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Refill, then take one token if available
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_seen = self.last_seen.max(now);

        if self.tokens + EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Refill tokens based on elapsed time.
    ///
    /// Clock readings older than the last refill add nothing.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let interval = self.refill_interval.as_secs_f64();
        let added = if interval > 0.0 {
            elapsed.as_secs_f64() / interval
        } else {
            self.capacity
        };

        self.tokens = (self.tokens + added).min(self.capacity);
        self.last_refill = now;
    }

    /// Current token count (without refilling)
    #[cfg(test)]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time until the next whole token is available
    pub fn retry_after(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        self.refill_interval.mul_f64(missing)
    }

    /// Time since the bucket was last consulted
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}
