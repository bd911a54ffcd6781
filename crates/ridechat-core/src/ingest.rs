//! Ingest pipeline for inbound client messages.
//!
//! For each message: validate, stamp the server-side room and metadata,
//! resolve the sender, append to the room log, queue the relational write,
//! and publish on the fanout topic.

use crate::connection::{ConnectionId, Identity};
use crate::metrics;
use crate::persist::PersistQueue;
use crate::room::RoomId;
use crate::store::{AppendLog, Fanout, FanoutError, MessageStore, StoreError};
use chrono::Utc;
use ridechat_protocol::{codec, ChatMessage, FanoutEnvelope, InboundMessage, ProtocolError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Ingest errors. Each one affects a single message only.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Message body is empty or whitespace.
    #[error("Message content is empty")]
    EmptyContent,

    /// Message body exceeds the configured limit.
    #[error("Message content has {length} characters, limit is {max}")]
    ContentTooLong {
        /// Characters in the rejected body.
        length: usize,
        /// Configured limit.
        max: usize,
    },

    /// The room log rejected the append; the message was not broadcast.
    #[error("Append to room log failed: {0}")]
    Append(#[source] StoreError),

    /// The message could not be encoded for fanout.
    #[error("Encoding failed: {0}")]
    Encode(#[from] ProtocolError),

    /// Publishing failed; the message is only recoverable from history.
    #[error("Publish failed: {0}")]
    Publish(#[source] FanoutError),
}

impl IngestError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::EmptyContent | IngestError::ContentTooLong { .. } => "validation",
            IngestError::Append(_) => "append",
            IngestError::Encode(_) => "encode",
            IngestError::Publish(_) => "publish",
        }
    }
}

/// Ingest configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum message body length in characters.
    pub max_content_length: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_content_length: 4000,
        }
    }
}

/// Server-side state of the sending connection.
#[derive(Debug, Clone)]
pub struct IngestContext {
    /// Sending connection.
    pub connection_id: ConnectionId,
    /// Room the connection joined.
    pub room: RoomId,
    /// Authenticated user, if any.
    pub identity: Option<Identity>,
}

impl IngestContext {
    /// Create a context for an anonymous connection.
    #[must_use]
    pub fn new(connection_id: ConnectionId, room: impl Into<RoomId>) -> Self {
        Self {
            connection_id,
            room: room.into(),
            identity: None,
        }
    }

    /// Attach an authenticated identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }
}

/// The ingest pipeline shared by all connection handlers.
#[derive(Clone)]
pub struct IngestPipeline {
    log: Arc<dyn AppendLog>,
    users: Arc<dyn MessageStore>,
    fanout: Arc<dyn Fanout>,
    persist: PersistQueue,
    config: IngestConfig,
}

impl IngestPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        log: Arc<dyn AppendLog>,
        users: Arc<dyn MessageStore>,
        fanout: Arc<dyn Fanout>,
        persist: PersistQueue,
        config: IngestConfig,
    ) -> Self {
        Self {
            log,
            users,
            fanout,
            persist,
            config,
        }
    }

    /// Handle one inbound message from a connection.
    ///
    /// Returns the message as appended and published.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid, cannot be appended to the
    /// room log, or cannot be published.
    pub async fn ingest(
        &self,
        ctx: &IngestContext,
        inbound: InboundMessage,
    ) -> Result<ChatMessage, IngestError> {
        let start = Instant::now();
        let result = self.process(ctx, inbound).await;
        metrics::record_ingest_latency(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            metrics::record_error(e.kind());
        }
        result
    }

    async fn process(
        &self,
        ctx: &IngestContext,
        inbound: InboundMessage,
    ) -> Result<ChatMessage, IngestError> {
        self.validate(&inbound.content)?;

        if let Some(claimed) = inbound.room_id.as_deref().filter(|r| *r != ctx.room) {
            debug!(
                connection = %ctx.connection_id,
                room = %ctx.room,
                claimed = %claimed,
                "Ignoring client-supplied room"
            );
        }

        let created_at = Utc::now();
        let timestamp = inbound
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| created_at.format("%H:%M").to_string());

        let mut message = ChatMessage {
            room_id: ctx.room.clone(),
            content: inbound.content,
            timestamp,
            created_at: Some(created_at),
            ..Default::default()
        };
        self.resolve_sender(ctx, inbound.sender_id, &mut message).await;
        if ctx.identity.is_none() && message.sender_name.is_empty() {
            if let Some(username) = inbound.username.as_deref().map(str::trim) {
                message.sender_name = username.to_string();
            }
        }

        let seq = self
            .log
            .append(&ctx.room, &message)
            .await
            .map_err(IngestError::Append)?;
        message.seq = Some(seq);
        trace!(connection = %ctx.connection_id, room = %ctx.room, seq = ?message.seq, "Appended");

        self.persist.enqueue(message.clone());

        let envelope = FanoutEnvelope::new(message.clone(), Some(ctx.connection_id.to_string()));
        let payload = codec::encode_envelope(&envelope)?;
        self.fanout
            .publish(payload)
            .await
            .map_err(IngestError::Publish)?;

        Ok(message)
    }

    fn validate(&self, content: &str) -> Result<(), IngestError> {
        if content.trim().is_empty() {
            return Err(IngestError::EmptyContent);
        }
        let length = content.chars().count();
        if length > self.config.max_content_length {
            return Err(IngestError::ContentTooLong {
                length,
                max: self.config.max_content_length,
            });
        }
        Ok(())
    }

    /// Fill the sender fields.
    ///
    /// An authenticated connection always speaks as its own user; anonymous
    /// connections keep their claimed id. Display details come from the
    /// users table; an anonymous sender the table does not know falls back
    /// to the `username` it sent.
    async fn resolve_sender(
        &self,
        ctx: &IngestContext,
        claimed: Option<String>,
        message: &mut ChatMessage,
    ) {
        match &ctx.identity {
            Some(identity) => {
                message.sender_id = identity.user_id.clone();
                message.sender_name = identity.name.clone();
            }
            None => {
                message.sender_id = claimed.unwrap_or_default().trim().to_string();
            }
        }

        if message.is_anonymous() {
            return;
        }

        match self.users.lookup_user(&message.sender_id).await {
            Ok(Some(profile)) => {
                if !profile.name.is_empty() {
                    message.sender_name = profile.name;
                }
                message.sender_picture = profile.picture;
            }
            Ok(None) => {
                debug!(sender = %message.sender_id, "Unknown sender");
            }
            Err(e) => {
                warn!(sender = %message.sender_id, error = %e, "Sender lookup failed");
                metrics::record_error("user_lookup");
            }
        }
    }
}
