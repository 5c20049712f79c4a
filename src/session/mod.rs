//! Session Engine
//!
//! One session per connected client. A session owns:
//!
//! - **Reader**: reads frames and hands them to the dispatcher (runs inline
//!   in `Session::run`)
//! - **Dispatcher**: validates requests and launches command tasks, bounded
//!   by `max_concurrent_commands`
//! - **Multiplexer**: the single writer draining the outbound queue
//! - **Keepalive**: a periodic ping through the same queue
//!
//! # Teardown
//!
//! Whatever ends the session first (close frame, read or write failure, a
//! stalled outbound queue, server shutdown) moves it to Closing and cancels
//! its token. Command tasks kill their processes, the keepalive and writer
//! stop, the sink is closed and the session ends in Closed. No task of the
//! session outlives `run`.

mod config;
mod dispatcher;
mod multiplexer;
mod state;

#[cfg(test)]
mod tests;

pub use config::SessionConfig;
pub use dispatcher::{Dispatch, Dispatcher};
pub use multiplexer::{channel, keepalive, Event, EventSender, Multiplexer};
pub use state::{CloseReason, SessionControl, SessionState};

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics;
use crate::probe::ProbeExecutor;
use crate::transport::{FrameSink, FrameSource, FrameTransport, InboundFrame};

/// What happened over a session's lifetime
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: Uuid,
    pub reason: CloseReason,
    pub commands_launched: u64,
    pub frames_written: u64,
}

/// External view of a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    control: Arc<SessionControl>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.control.subscribe()
    }

    /// Ask the session to close
    pub fn shutdown(&self) {
        self.control.begin_closing(CloseReason::Shutdown);
    }
}

pub struct Session {
    id: Uuid,
    config: SessionConfig,
    executor: Arc<ProbeExecutor>,
    control: Arc<SessionControl>,
}

impl Session {
    /// Create a session that also closes when `shutdown` fires
    pub fn new(config: SessionConfig, executor: Arc<ProbeExecutor>, shutdown: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            executor,
            control: Arc::new(SessionControl::new(shutdown.child_token())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            control: self.control.clone(),
        }
    }

    /// Serve `transport` until the session closes
    pub async fn run<T: FrameTransport>(self, transport: T) -> SessionSummary {
        let (sink, mut source) = transport.into_split();
        let sink = Arc::new(Mutex::new(sink));
        let cancel = self.control.cancel_token().clone();

        metrics::SESSIONS_ACTIVE.inc();
        metrics::SESSIONS_TOTAL.inc();
        info!(session_id = %self.id, "Session opened");

        let (events, rx) = channel(
            self.config.outbound_queue_capacity,
            self.config.send_grace(),
            self.control.clone(),
        );
        let writer = tokio::spawn(Multiplexer::new(sink.clone(), rx, self.control.clone()).run());
        let pinger = tokio::spawn(keepalive(
            events.clone(),
            self.config.keepalive_interval(),
            cancel.clone(),
        ));

        let tracker = TaskTracker::new();
        let dispatcher = Dispatcher::new(
            self.id,
            self.executor.clone(),
            self.config.max_concurrent_commands,
            events,
            cancel.clone(),
            tracker.clone(),
        );

        let mut commands_launched = 0u64;
        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Shutdown,
                frame = source.read_frame() => frame,
            };

            let payload = match frame {
                None | Some(Ok(InboundFrame::Close)) => break CloseReason::PeerClosed,
                Some(Err(e)) => break CloseReason::ReadFailed(e.to_string()),
                Some(Ok(InboundFrame::Ping)) | Some(Ok(InboundFrame::Pong)) => continue,
                Some(Ok(InboundFrame::Text(text))) => text.into_bytes(),
                Some(Ok(InboundFrame::Binary(data))) => data,
            };

            if dispatcher.dispatch(&payload).await == Dispatch::Launched {
                commands_launched += 1;
            }
        };

        self.control.begin_closing(reason.clone());
        debug!(session_id = %self.id, running = dispatcher.running(), "Session closing");

        tracker.close();
        tracker.wait().await;
        drop(dispatcher);

        let _ = pinger.await;
        let frames_written = writer.await.unwrap_or_default();

        if let Err(e) = sink.lock().await.close().await {
            debug!(session_id = %self.id, error = %e, "Failed to close sink");
        }
        drop(source);

        self.control.mark_closed();
        metrics::SESSIONS_ACTIVE.dec();

        let reason = self.control.close_reason().cloned().unwrap_or(reason);
        info!(
            session_id = %self.id,
            reason = %reason,
            commands_launched,
            frames_written,
            "Session closed"
        );

        SessionSummary {
            id: self.id,
            reason,
            commands_launched,
            frames_written,
        }
    }
}
