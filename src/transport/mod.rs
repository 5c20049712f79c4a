//! Frame Transport Layer
//!
//! This module defines the duplex message stream a session runs on.
//! Two transports are provided:
//!
//! - **WebSocket**: axum's upgraded connection (production)
//! - **Memory**: channel-backed pair for embedding and tests
//!
//! # Architecture
//!
//! The transport layer only moves frames. Decoding requests and encoding
//! responses happen in the session layer. A transport is split once into a
//! read half, owned by the session's reader, and a write half, owned by the
//! multiplexer.

mod memory;
mod websocket;

pub use memory::{memory_pair, MemoryClient, MemorySink, MemorySource, MemoryTransport, OutboundFrame};
pub use websocket::{WsSink, WsSource};

use crate::error::TransportError;
use async_trait::async_trait;

/// One inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Read half of a duplex frame stream
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Read the next frame.
    ///
    /// Returns `None` once the peer has gone away.
    async fn read_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// Write half of a duplex frame stream
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one text frame
    async fn write_frame(&mut self, text: String) -> Result<(), TransportError>;

    /// Write a transport-level ping
    async fn write_ping(&mut self) -> Result<(), TransportError>;

    /// Close the stream
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A duplex frame stream that can be split into its halves
pub trait FrameTransport: Send + 'static {
    type Sink: FrameSink;
    type Source: FrameSource;

    fn into_split(self) -> (Self::Sink, Self::Source);
}
