//! Redis-backed append-log and fanout.
//!
//! Each room is a stream `<prefix><room>` whose entries carry the encoded
//! message in a single `data` field; the stream entry id is the message's
//! sequence. Live messages for every room travel over one pub/sub channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use redis::{Client, RedisError};
use ridechat_core::room::stream_key;
use ridechat_core::{AppendLog, Fanout, FanoutError, FanoutStream, StoreError};
use ridechat_protocol::{codec, ChatMessage, Sequence};
use tracing::{debug, warn};

/// Stream field holding the encoded message.
const DATA_FIELD: &str = "data";

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Per-room message log on Redis streams.
#[derive(Clone)]
pub struct RedisAppendLog {
    conn: ConnectionManager,
    prefix: String,
    max_len: Option<usize>,
}

impl RedisAppendLog {
    /// Create a log over an existing connection.
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, max_len: Option<usize>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            max_len,
        }
    }
}

#[async_trait]
impl AppendLog for RedisAppendLog {
    async fn append(&self, room: &str, message: &ChatMessage) -> Result<Sequence, StoreError> {
        let payload = codec::encode_message(message)?;
        let key = stream_key(&self.prefix, room);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&key);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg(DATA_FIELD).arg(payload.to_vec());

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(Sequence::new(id))
    }

    async fn read_recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let key = stream_key(&self.prefix, room);
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let mut messages = Vec::with_capacity(reply.ids.len());
        for entry in reply.ids {
            let Some(data) = entry.get::<Vec<u8>>(DATA_FIELD) else {
                warn!(stream = %key, id = %entry.id, "Entry without data field, skipping");
                continue;
            };
            match codec::decode_message(&data) {
                Ok(mut message) => {
                    message.seq = Some(Sequence::new(entry.id));
                    messages.push(message);
                }
                Err(e) => {
                    warn!(stream = %key, id = %entry.id, error = %e, "Undecodable entry, skipping");
                }
            }
        }
        Ok(messages)
    }
}

/// Fanout over a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisFanout {
    client: Client,
    conn: ConnectionManager,
    channel: String,
}

impl RedisFanout {
    /// Create a fanout publishing on `channel`.
    ///
    /// Subscriptions open their own dedicated connection from `client`.
    #[must_use]
    pub fn new(client: Client, conn: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            client,
            conn,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Fanout for RedisFanout {
    async fn publish(&self, payload: Bytes) -> Result<(), FanoutError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload.to_vec())
            .query_async(&mut conn)
            .await
            .map_err(|e| FanoutError::Publish(e.to_string()))?;
        debug!(channel = %self.channel, receivers, "Published");
        Ok(())
    }

    async fn subscribe(&self) -> Result<FanoutStream, FanoutError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| FanoutError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| FanoutError::Subscribe(e.to_string()))?;

        debug!(channel = %self.channel, "Subscribed");
        Ok(pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()))
            .boxed())
    }
}

/// Open a client and a managed connection to `url`.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the server cannot be reached.
pub async fn connect(url: &str) -> Result<(Client, ConnectionManager), RedisError> {
    let client = Client::open(url)?;
    let conn = ConnectionManager::new(client.clone()).await?;
    Ok((client, conn))
}
