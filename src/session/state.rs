//! Session lifecycle
//!
//! ```text
//! Open ──(close frame | read error | write error | backpressure | shutdown)──> Closing ──> Closed
//! ```
//!
//! The first trigger wins. Entering Closing cancels the session token, which
//! every task belonging to the session observes.

use std::fmt;
use std::sync::OnceLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Why a session left the Open state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// A producer could not enqueue within the send grace period
    Backpressure,
    /// Server shutdown or an explicit close request
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {}", e),
            CloseReason::Backpressure => write!(f, "outbound queue stalled"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Shared lifecycle state of one session
#[derive(Debug)]
pub struct SessionControl {
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl SessionControl {
    pub fn new(cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Open);
        Self {
            state,
            cancel,
            reason: OnceLock::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move Open to Closing and cancel the session token.
    ///
    /// Returns `false` if the session had already left Open.
    pub fn begin_closing(&self, reason: CloseReason) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == SessionState::Open {
                *state = SessionState::Closing;
                true
            } else {
                false
            }
        });

        if moved {
            let _ = self.reason.set(reason);
        }
        self.cancel.cancel();
        moved
    }

    /// Terminal transition, once teardown is complete
    pub fn mark_closed(&self) {
        self.state.send_replace(SessionState::Closed);
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.reason.get()
    }
}
