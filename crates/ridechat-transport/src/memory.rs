//! In-memory transport.
//!
//! A duplex pair of channels standing in for a client connection. The
//! server side gets a [`MemorySink`] and [`MemoryStream`]; the test drives
//! the [`MemoryClient`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{MessageSink, MessageStream, TransportError};

/// Client-side events observed by a [`MemoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A payload sent by the server.
    Payload(Bytes),
    /// The server closed the connection.
    Closed,
}

/// Create a connected pair.
///
/// `capacity` bounds each direction.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryClient, MemorySink, MemoryStream) {
    let (to_server, from_client) = mpsc::channel(capacity);
    let (to_client, from_server) = mpsc::channel(capacity);
    (
        MemoryClient {
            sender: Some(to_server),
            receiver: from_server,
        },
        MemorySink {
            sender: to_client,
            is_open: true,
        },
        MemoryStream {
            receiver: from_client,
        },
    )
}

/// Test-side handle of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    sender: Option<mpsc::Sender<Result<Bytes, TransportError>>>,
    receiver: mpsc::Receiver<ClientEvent>,
}

impl MemoryClient {
    /// Send a payload to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the client disconnected.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::ConnectionClosed)?;
        sender
            .send(Ok(payload.into()))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Inject a transport error into the server's read loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the client disconnected.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        let sender = self.sender.as_ref().ok_or(TransportError::ConnectionClosed)?;
        sender
            .send(Err(TransportError::ReceiveFailed(reason.into())))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close the client-to-server direction.
    pub fn disconnect(&mut self) {
        self.sender = None;
    }

    /// Wait for the next event from the server.
    ///
    /// Returns `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.receiver.recv().await
    }
}

/// Server-side writing half.
#[derive(Debug)]
pub struct MemorySink {
    sender: mpsc::Sender<ClientEvent>,
    is_open: bool,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.sender
            .send(ClientEvent::Payload(payload))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }
        // The client may already be gone.
        let _ = self.sender.send(ClientEvent::Closed).await;
        Ok(())
    }
}

/// Server-side reading half.
#[derive(Debug)]
pub struct MemoryStream {
    receiver: mpsc::Receiver<Result<Bytes, TransportError>>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.receiver.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}
