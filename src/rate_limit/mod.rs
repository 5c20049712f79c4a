//! Rate Limiting Module
//!
//! Per-source admission throttle for new connections.
//!
//! # Features
//!
//! - Token bucket algorithm for smooth rate limiting
//! - Lazily created buckets keyed by source (client IP)
//! - Per-entry locking: different sources never contend
//! - Background sweep evicting idle buckets so the map stays bounded
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 RateLimiter                  │
//! ├──────────────────────────────────────────────┤
//! │  DashMap<source, TokenBucket>                │
//! │    allow(key) ──▶ refill ──▶ take one token  │
//! ├──────────────────────────────────────────────┤
//! │  sweeper task: evict buckets idle > TTL      │
//! └──────────────────────────────────────────────┘
//! ```

pub mod bucket;
pub mod config;
pub mod limiter;

pub use bucket::TokenBucket;
pub use config::RateLimitConfig;
pub use limiter::{RateLimitResult, RateLimiter};
