//! Storage and fanout abstractions.
//!
//! The core talks to three external services through these traits:
//!
//! - [`AppendLog`] - per-room ordered log used for history replay (hot)
//! - [`MessageStore`] - relational store for persistence and sender lookup (cold)
//! - [`Fanout`] - one shared publish/subscribe topic for all rooms
//!
//! Implementations must be safe to share between tasks.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use ridechat_protocol::{ChatMessage, Sequence};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the append-log or the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backing service rejected the operation.
    #[error("Store operation failed: {0}")]
    Backend(String),

    /// A message could not be encoded for storage.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ridechat_protocol::ProtocolError),
}

/// Errors from the fanout channel.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Publishing a payload failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscribing to the topic failed.
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
}

/// Sender details resolved from the users table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub picture: String,
}

/// Per-room ordered append-only log.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Append a message to the room's log and return its position.
    ///
    /// Positions are strictly increasing within a room.
    async fn append(&self, room: &str, message: &ChatMessage) -> Result<Sequence, StoreError>;

    /// Read up to `limit` most recent messages, newest first.
    ///
    /// Each entry carries its position in `seq`.
    async fn read_recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// The relational store, reduced to the two operations the core needs.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message.
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Look up a sender's display details.
    ///
    /// Returns `Ok(None)` for an unknown user.
    async fn lookup_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
}

/// Stream of raw payloads delivered on the fanout topic.
///
/// The stream ends when the subscription is lost.
pub type FanoutStream = BoxStream<'static, Bytes>;

/// Shared publish/subscribe topic carrying messages for every room.
#[async_trait]
pub trait Fanout: Send + Sync {
    /// Publish a payload to all subscribers.
    async fn publish(&self, payload: Bytes) -> Result<(), FanoutError>;

    /// Open a subscription.
    async fn subscribe(&self) -> Result<FanoutStream, FanoutError>;
}
