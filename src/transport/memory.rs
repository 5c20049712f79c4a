//! In-memory transport
//!
//! A channel-backed duplex stream. The `MemoryClient` half plays the remote
//! peer: it pushes inbound frames and observes what the session writes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource, FrameTransport, InboundFrame};
use crate::error::TransportError;

/// A frame written by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Ping,
    Close,
}

/// Session side of an in-memory stream
pub struct MemoryTransport {
    inbound: mpsc::Receiver<InboundFrame>,
    outbound: mpsc::Sender<OutboundFrame>,
}

/// Peer side of an in-memory stream
pub struct MemoryClient {
    inbound: mpsc::Sender<InboundFrame>,
    outbound: mpsc::Receiver<OutboundFrame>,
}

/// Create a connected pair.
///
/// `capacity` bounds each direction; a peer that stops reading eventually
/// blocks the session's writes.
pub fn memory_pair(capacity: usize) -> (MemoryTransport, MemoryClient) {
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryTransport {
            inbound: in_rx,
            outbound: out_tx,
        },
        MemoryClient {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

impl MemoryClient {
    /// Send a frame to the session
    pub async fn send(&self, frame: InboundFrame) -> Result<(), TransportError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(InboundFrame::Text(text.into())).await
    }

    /// Next frame written by the session; `None` once it has hung up
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    /// Next text frame, skipping pings; `None` on close
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.outbound.recv().await? {
                OutboundFrame::Text(text) => return Some(text),
                OutboundFrame::Ping => continue,
                OutboundFrame::Close => return None,
            }
        }
    }

    /// Stop reading: further session writes fail
    pub fn close_reader(&mut self) {
        self.outbound.close();
    }
}

/// Write half of a `MemoryTransport`
pub struct MemorySink(mpsc::Sender<OutboundFrame>);

/// Read half of a `MemoryTransport`
pub struct MemorySource(mpsc::Receiver<InboundFrame>);

impl FrameTransport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn into_split(self) -> (MemorySink, MemorySource) {
        (MemorySink(self.outbound), MemorySource(self.inbound))
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn read_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

impl MemorySink {
    async fn push(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.0
            .send(frame)
            .await
            .map_err(|_| TransportError::Write("peer stopped reading".to_string()))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, text: String) -> Result<(), TransportError> {
        self.push(OutboundFrame::Text(text)).await
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        self.push(OutboundFrame::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Best effort: a stalled or departed peer must not block teardown
        let _ = self.0.try_send(OutboundFrame::Close);
        Ok(())
    }
}
