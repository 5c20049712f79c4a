//! netprobe
//!
//! A WebSocket service that runs whitelisted network diagnostics (`ping`,
//! `dig`) on behalf of connected clients and streams their output back.
//! Parameters are validated before any process is spawned, connections are
//! throttled per source address, and every session tears down its commands
//! when the client goes away.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod protocol;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod transport;
