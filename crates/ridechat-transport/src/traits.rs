//! Transport abstraction traits for ridechat.
//!
//! These traits define the interface the connection handler needs from a
//! transport, allowing it to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound payload exceeds the transport limit.
    #[error("Payload of {size} bytes exceeds limit {max}")]
    PayloadTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Server-to-client half of a connection.
#[async_trait]
pub trait MessageSink: Send {
    /// Send one payload to the client.
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Client-to-server half of a connection.
#[async_trait]
pub trait MessageStream: Send {
    /// Receive the next payload from the client.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        (**self).send(payload).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: MessageStream + ?Sized> MessageStream for Box<T> {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        (**self).recv().await
    }

    fn remote_addr(&self) -> Option<String> {
        (**self).remote_addr()
    }
}
