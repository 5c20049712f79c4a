//! Session settings
//!
//! Limits and timers applied to every connection: concurrent commands,
//! outbound queue size, send grace, keepalive period and command deadline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-connection limits and timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Commands allowed to run at once on one session
    pub max_concurrent_commands: usize,

    /// Responses buffered between command tasks and the writer
    pub outbound_queue_capacity: usize,

    /// How long a producer waits on a full queue before the session is
    /// closed for backpressure
    pub send_grace_ms: u64,

    /// Interval between keepalive pings
    pub keepalive_interval_secs: u64,

    /// Deadline for a single command
    pub command_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_commands: 4,
            outbound_queue_capacity: 256,
            send_grace_ms: 5000,
            keepalive_interval_secs: 30,
            command_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn send_grace(&self) -> Duration {
        Duration::from_millis(self.send_grace_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_commands == 0 {
            anyhow::bail!("session.max_concurrent_commands must be at least 1");
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("session.outbound_queue_capacity must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            anyhow::bail!("session.command_timeout_secs must be at least 1");
        }
        Ok(())
    }
}
