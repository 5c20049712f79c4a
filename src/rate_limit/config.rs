//! Rate Limit Configuration
//!
//! Configuration for the per-source admission throttle.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default admission limits
pub const DEFAULT_CAPACITY: u32 = 1; // burst allowance
pub const DEFAULT_PER_MINUTE: u32 = 10; // admissions per minute
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_IDLE_MULTIPLIER: u32 = 10;

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Bucket capacity (maximum burst)
    pub capacity: u32,

    /// Sustained admissions per minute per source
    pub per_minute: u32,

    /// How often idle buckets are swept, in seconds
    pub sweep_interval_secs: u64,

    /// A bucket is evicted after sitting idle for this many full-refill periods
    pub idle_multiplier: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            per_minute: DEFAULT_PER_MINUTE,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            idle_multiplier: DEFAULT_IDLE_MULTIPLIER,
        }
    }
}

impl RateLimitConfig {
    /// Apply `NETPROBE_RATE_LIMIT_*` overrides
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("NETPROBE_RATE_LIMIT_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        if let Ok(val) = std::env::var("NETPROBE_RATE_LIMIT_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("NETPROBE_RATE_LIMIT_PER_MINUTE") {
            if let Ok(limit) = val.parse() {
                self.per_minute = limit;
            }
        }

        self
    }

    /// Time for one token to refill
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(60) / self.per_minute.max(1)
    }

    /// Idle time after which a bucket is evicted.
    ///
    /// Never shorter than a full refill, so eviction cannot hand out extra
    /// tokens.
    pub fn idle_ttl(&self) -> Duration {
        self.refill_interval() * self.capacity.max(1) * self.idle_multiplier.max(1)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
