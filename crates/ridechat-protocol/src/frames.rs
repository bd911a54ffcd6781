//! Frame types for the ridechat protocol.
//!
//! Field names on the wire are camelCase to match the web client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A message as sent by a client.
///
/// `roomId` is accepted so that older clients still decode, but the server
/// never reads it: the room always comes from the connection's join state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Claimed sender identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Display name the client shows for itself. Used only when the
    /// sender is not a known user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Message body.
    pub content: String,
    /// Client display timestamp (e.g. `"14:05"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Ignored by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl InboundMessage {
    /// Create an inbound message with only a body.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the claimed sender.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Set the claimed display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the claimed room.
    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

/// Position of a message in its room's append-log.
///
/// Redis stream IDs look like `1718000000000-3`; the in-memory log uses the
/// same `<major>-<minor>` shape. Ordering compares the numeric parts and
/// falls back to plain string order for anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(pub String);

impl Sequence {
    /// Create a sequence from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the sequence as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric `(major, minor)` parts, if the id has the stream shape.
    #[must_use]
    pub fn parts(&self) -> Option<(u64, u64)> {
        let (major, minor) = self.0.split_once('-')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }
}

impl Ord for Sequence {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat message as stored in the append-log and delivered to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Sender identifier, empty for anonymous senders.
    #[serde(default)]
    pub sender_id: String,
    /// Sender display name.
    #[serde(default)]
    pub sender_name: String,
    /// Sender avatar URL.
    #[serde(default)]
    pub sender_picture: String,
    /// Room the message belongs to.
    pub room_id: String,
    /// Message body.
    pub content: String,
    /// Client display timestamp.
    #[serde(default)]
    pub timestamp: String,
    /// Append-log position, assigned once the message is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Sequence>,
    /// Server creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Create a message for a room.
    #[must_use]
    pub fn new(room_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set the sender identity fields.
    #[must_use]
    pub fn with_sender(
        mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        picture: impl Into<String>,
    ) -> Self {
        self.sender_id = id.into();
        self.sender_name = name.into();
        self.sender_picture = picture.into();
        self
    }

    /// Check whether the sender is anonymous.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.sender_id.is_empty()
    }
}

/// Payload carried on the shared fanout topic.
///
/// The room travels inside the message; `origin` names the connection that
/// sent it so the dispatcher can suppress echoes when configured to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    /// The message being broadcast.
    #[serde(flatten)]
    pub message: ChatMessage,
    /// Sending connection, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl FanoutEnvelope {
    /// Wrap a message with its origin connection.
    #[must_use]
    pub fn new(message: ChatMessage, origin: Option<String>) -> Self {
        Self { message, origin }
    }
}
