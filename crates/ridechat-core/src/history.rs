//! History replay for joining connections.

use crate::metrics;
use crate::store::AppendLog;
use ridechat_protocol::ChatMessage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of messages replayed on join.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Loads the most recent messages of a room from the append-log.
#[derive(Clone)]
pub struct HistoryLoader {
    log: Arc<dyn AppendLog>,
    limit: usize,
}

impl HistoryLoader {
    /// Create a loader with a default limit.
    #[must_use]
    pub fn new(log: Arc<dyn AppendLog>, limit: usize) -> Self {
        Self { log, limit }
    }

    /// The limit used by [`HistoryLoader::load`].
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Load the configured number of recent messages.
    pub async fn load(&self, room: &str) -> Vec<ChatMessage> {
        self.load_recent(room, self.limit).await
    }

    /// Load up to `limit` most recent messages for `room`, oldest first.
    ///
    /// An unreachable log degrades to an empty history.
    pub async fn load_recent(&self, room: &str, limit: usize) -> Vec<ChatMessage> {
        if limit == 0 {
            return Vec::new();
        }

        match self.log.read_recent(room, limit).await {
            Ok(mut messages) => {
                messages.truncate(limit);
                messages.reverse();
                debug!(room = %room, count = messages.len(), "Loaded history");
                messages
            }
            Err(e) => {
                warn!(room = %room, error = %e, "History unavailable, replaying nothing");
                metrics::record_error("history");
                Vec::new()
            }
        }
    }
}
