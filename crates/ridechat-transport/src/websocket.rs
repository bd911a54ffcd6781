//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`]. Text and binary frames both carry
//! JSON payloads; ping/pong is answered by the underlying protocol layer.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{MessageSink, MessageStream, TransportError};

/// Split an upgraded socket into its two halves.
#[must_use]
pub fn split_websocket(
    socket: WebSocket,
    max_message_size: usize,
    remote_addr: Option<SocketAddr>,
) -> (WebSocketSink, WebSocketStream) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            inner: sink,
            is_open: true,
        },
        WebSocketStream {
            inner: stream,
            max_message_size,
            remote_addr,
        },
    )
}

/// Writing half of a WebSocket connection.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
    is_open: bool,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| TransportError::SendFailed(format!("payload is not UTF-8: {e}")))?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }
}

/// Reading half of a WebSocket connection.
pub struct WebSocketStream {
    inner: SplitStream<WebSocket>,
    max_message_size: usize,
    remote_addr: Option<SocketAddr>,
}

impl WebSocketStream {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                size, self.max_message_size
            );
            return Err(TransportError::PayloadTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(Bytes::from(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Handled by the protocol layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
