//! In-process backends.
//!
//! These implement the storage, fanout and auth traits without external
//! services. The server uses them for its `memory` backend (single instance
//! development mode); tests use them with failure injection.

use crate::auth::{AuthError, Authenticator};
use crate::connection::Identity;
use crate::store::{
    AppendLog, Fanout, FanoutError, FanoutStream, MessageStore, StoreError, UserProfile,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use ridechat_protocol::{ChatMessage, Sequence};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default fanout buffer for [`MemoryFanout`].
const DEFAULT_FANOUT_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct RoomLog {
    next: u64,
    entries: Vec<ChatMessage>,
}

/// Append-log kept in memory, one vector per room.
#[derive(Debug, Default)]
pub struct MemoryAppendLog {
    rooms: Mutex<HashMap<String, RoomLog>>,
    max_len: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryAppendLog {
    /// Create an unbounded log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that keeps at most `max_len` entries per room.
    #[must_use]
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    /// Make every operation fail as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of entries retained for a room.
    #[must_use]
    pub fn len(&self, room: &str) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map_or(0, |log| log.entries.len())
    }

    /// All retained entries for a room, oldest first.
    #[must_use]
    pub fn entries(&self, room: &str) -> Vec<ChatMessage> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .map(|log| log.entries.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("append-log is down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AppendLog for MemoryAppendLog {
    async fn append(&self, room: &str, message: &ChatMessage) -> Result<Sequence, StoreError> {
        self.check_available()?;

        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let log = rooms.entry(room.to_string()).or_default();
        log.next += 1;
        let seq = Sequence::new(format!("{}-0", log.next));

        let mut entry = message.clone();
        entry.seq = Some(seq.clone());
        log.entries.push(entry);

        if let Some(max) = self.max_len {
            let excess = log.entries.len().saturating_sub(max);
            log.entries.drain(..excess);
        }
        Ok(seq)
    }

    async fn read_recent(&self, room: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        self.check_available()?;

        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rooms
            .get(room)
            .map(|log| log.entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Fanout topic backed by a tokio broadcast channel.
#[derive(Debug)]
pub struct MemoryFanout {
    sender: broadcast::Sender<Bytes>,
    failing: AtomicBool,
}

impl MemoryFanout {
    /// Create a fanout with the default buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FANOUT_CAPACITY)
    }

    /// Create a fanout with a specific buffer size.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            failing: AtomicBool::new(false),
        }
    }

    /// Make publishes fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fanout for MemoryFanout {
    async fn publish(&self, payload: Bytes) -> Result<(), FanoutError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FanoutError::Publish("fanout is down".into()));
        }
        // No subscribers is not an error; the message stays in the log.
        let _ = self.sender.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<FanoutStream, FanoutError> {
        let rx = self.sender.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Fanout subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// Relational store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    users: Mutex<HashMap<String, UserProfile>>,
    fail_writes: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user row.
    pub fn insert_user(&self, user: UserProfile) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.id.clone(), user);
    }

    /// Make `save_message` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `lookup_user` fail.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Messages persisted so far, in write order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("insert into messages failed".into()));
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }

    async fn lookup_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("users table unreachable".into()));
        }
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned())
    }
}

/// Authenticator with a fixed token table.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    /// Create an authenticator that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `identity`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}
