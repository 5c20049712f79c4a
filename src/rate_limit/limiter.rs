//! Rate Limiter
//!
//! Process-wide map from source key to token bucket. Each entry is locked
//! independently, so admission checks for different sources do not contend
//! while checks for the same source are linearized.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::IntGauge;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::bucket::TokenBucket;
use super::config::RateLimitConfig;
use crate::metrics;

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Time until a token is available (if not allowed)
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

/// Per-source token bucket rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<DashMap<String, TokenBucket>>,
    tracked: IntGauge,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_gauge(config, metrics::RATE_LIMIT_BUCKETS.clone())
    }

    /// Report the bucket count through `tracked` instead of the global gauge
    pub fn with_gauge(config: RateLimitConfig, tracked: IntGauge) -> Self {
        Self {
            config,
            buckets: Arc::new(DashMap::new()),
            tracked,
        }
    }

    /// Create a disabled rate limiter (for testing)
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig::disabled())
    }

    #[cfg(test)]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Try to admit one request from `key`
    pub fn allow(&self, key: &str) -> bool {
        self.check_at(key, Instant::now()).allowed
    }

    /// Try to admit one request from `key`, reporting when to retry
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Instant::now())
    }

    /// Admission check against an explicit clock reading
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::allowed();
        }

        // Fast path avoids allocating the key for known sources
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return Self::acquire(&mut bucket, now);
        }

        match self.buckets.entry(key.to_string()) {
            Entry::Occupied(mut entry) => Self::acquire(entry.get_mut(), now),
            Entry::Vacant(entry) => {
                let bucket =
                    TokenBucket::new(self.config.capacity, self.config.refill_interval(), now);
                let result = Self::acquire(entry.insert(bucket).value_mut(), now);
                self.tracked.inc();
                result
            }
        }
    }

    fn acquire(bucket: &mut TokenBucket, now: Instant) -> RateLimitResult {
        if bucket.try_acquire(now) {
            RateLimitResult::allowed()
        } else {
            RateLimitResult::denied(bucket.retry_after())
        }
    }

    /// Evict buckets idle longer than the configured TTL.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let ttl = self.config.idle_ttl();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) < ttl);
        let after = self.buckets.len();

        self.tracked.set(after as i64);
        before.saturating_sub(after)
    }

    /// Run `sweep` periodically until `shutdown` fires
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = limiter.sweep(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, remaining = limiter.len(), "Evicted idle rate-limit buckets");
                        }
                    }
                }
            }
        })
    }

    /// Number of tracked sources
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
