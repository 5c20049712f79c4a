//! Error Taxonomy
//!
//! Per-command errors (`ProbeError`) are reported to the client as a single
//! `error` response and never affect sibling commands. Only `TransportError`
//! tears down a session.

use std::time::Duration;

/// A parameter failed policy validation.
///
/// Always tagged with the offending field so clients can highlight it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Name of the parameter that failed
    pub field: String,

    /// Human-readable reason
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors that end a single command
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{tool} is not available on this host")]
    ExecutorUnavailable { tool: &'static str },

    #[error("{tool} failed: {detail}")]
    Execution { tool: &'static str, detail: String },

    #[error("{tool} timed out after {}s", .after.as_secs())]
    Timeout {
        tool: &'static str,
        after: Duration,
    },

    #[error("too many concurrent commands (limit {limit})")]
    Busy { limit: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The owning session is closing; nothing is reported to the client
    #[error("command cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Field tag for validation failures
    pub fn field(&self) -> Option<&str> {
        match self {
            ProbeError::Validation(e) => Some(&e.field),
            _ => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            ProbeError::Validation(_) => "invalid",
            ProbeError::ExecutorUnavailable { .. } => "unavailable",
            ProbeError::Execution { .. } => "failed",
            ProbeError::Timeout { .. } => "timeout",
            ProbeError::Busy { .. } => "busy",
            ProbeError::Protocol(_) => "protocol",
            ProbeError::Cancelled => "cancelled",
        }
    }
}

/// Read or write failure on the underlying frame stream.
///
/// Session-fatal: forces the Closing transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to read frame: {0}")]
    Read(String),

    #[error("failed to write frame: {0}")]
    Write(String),

    #[error("connection closed")]
    Closed,
}
