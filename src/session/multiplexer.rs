//! Outbound multiplexer
//!
//! Every task that wants to write to the peer enqueues an `Event` on one
//! bounded queue. A single writer task drains it and is the only code that
//! touches the sink, so frames are written whole and one at a time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::state::{CloseReason, SessionControl};
use crate::protocol::CommandResponse;
use crate::transport::FrameSink;

/// Something to write to the peer
#[derive(Debug, Clone)]
pub enum Event {
    Response(CommandResponse),
    Ping,
}

/// Producer handle onto the outbound queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    control: Arc<SessionControl>,
    grace: Duration,
}

/// Build the outbound queue
pub fn channel(
    capacity: usize,
    grace: Duration,
    control: Arc<SessionControl>,
) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx, control, grace }, rx)
}

impl EventSender {
    /// Enqueue an event.
    ///
    /// Returns `false` if the event was not enqueued: the session is closing,
    /// the writer is gone, or the queue stayed full for the whole grace
    /// period. The last case starts closing the session.
    pub async fn send(&self, event: Event) -> bool {
        let cancel = self.control.cancel_token();
        if cancel.is_cancelled() {
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tokio::time::timeout(self.grace, self.tx.send(event)) => match sent {
                Ok(Ok(())) => true,
                Ok(Err(_)) => false,
                Err(_) => {
                    warn!(grace_ms = self.grace.as_millis() as u64, "Outbound queue stalled, closing session");
                    self.control.begin_closing(CloseReason::Backpressure);
                    false
                }
            },
        }
    }

    pub async fn respond(&self, response: CommandResponse) -> bool {
        self.send(Event::Response(response)).await
    }
}

/// The single writer
pub struct Multiplexer<S> {
    sink: Arc<Mutex<S>>,
    rx: mpsc::Receiver<Event>,
    control: Arc<SessionControl>,
}

impl<S: FrameSink> Multiplexer<S> {
    pub fn new(sink: Arc<Mutex<S>>, rx: mpsc::Receiver<Event>, control: Arc<SessionControl>) -> Self {
        Self { sink, rx, control }
    }

    /// Drain the queue until the session closes.
    ///
    /// Returns the number of frames written. Events still queued when the
    /// session closes are discarded.
    pub async fn run(mut self) -> u64 {
        let cancel = self.control.cancel_token().clone();
        let mut written = 0u64;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let mut sink = self.sink.lock().await;
            let result = match event {
                Event::Response(response) => match response.to_json() {
                    Ok(text) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = sink.write_frame(text) => result,
                    },
                    Err(e) => {
                        error!(error = %e, "Failed to encode response");
                        continue;
                    }
                },
                Event::Ping => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = sink.write_ping() => result,
                },
            };

            if let Err(e) = result {
                warn!(error = %e, "Write failed, closing session");
                self.control.begin_closing(CloseReason::WriteFailed(e.to_string()));
                break;
            }
            written += 1;
        }

        self.rx.close();
        debug!(written, "Multiplexer stopped");
        written
    }
}

/// Enqueue a ping every `period` until cancelled
pub async fn keepalive(events: EventSender, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !events.send(Event::Ping).await {
                    break;
                }
            }
        }
    }
}
