//! # ridechat-transport
//!
//! Transport abstraction layer for ridechat.
//!
//! A connection is split into a [`MessageStream`] (client to server) and a
//! [`MessageSink`] (server to client) so that the read loop and the writer
//! can run as independent tasks. Payloads are whole JSON documents; framing
//! is the transport's job.
//!
//! - **WebSocket** - axum upgrade, text or binary frames
//! - **Memory** - in-process duplex used by tests
//!
//! ```rust,ignore
//! use ridechat_transport::{MessageSink, MessageStream};
//!
//! async fn echo(mut sink: impl MessageSink, mut stream: impl MessageStream) {
//!     while let Ok(Some(payload)) = stream.recv().await {
//!         let _ = sink.send(payload).await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{MessageSink, MessageStream, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{split_websocket, WebSocketSink, WebSocketStream};
