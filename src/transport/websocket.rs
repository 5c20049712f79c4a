//! WebSocket transport over axum's upgraded connection

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{FrameSink, FrameSource, FrameTransport, InboundFrame};
use crate::error::TransportError;

/// Write half of a WebSocket
pub struct WsSink(SplitSink<WebSocket, Message>);

/// Read half of a WebSocket
pub struct WsSource(SplitStream<WebSocket>);

impl FrameTransport for WebSocket {
    type Sink = WsSink;
    type Source = WsSource;

    fn into_split(self) -> (WsSink, WsSource) {
        let (sink, stream) = StreamExt::split(self);
        (WsSink(sink), WsSource(stream))
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn read_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        let message = match self.0.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(TransportError::Read(e.to_string()))),
        };

        let frame = match message {
            Message::Text(text) => InboundFrame::Text(text.as_str().to_owned()),
            Message::Binary(data) => InboundFrame::Binary(data.to_vec()),
            Message::Ping(_) => InboundFrame::Ping,
            Message::Pong(_) => InboundFrame::Pong,
            Message::Close(_) => InboundFrame::Close,
        };
        Some(Ok(frame))
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn write_frame(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn write_ping(&mut self) -> Result<(), TransportError> {
        self.0
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The peer may already be gone; closing the sink still releases it
        let _ = self.0.send(Message::Close(None)).await;
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}
