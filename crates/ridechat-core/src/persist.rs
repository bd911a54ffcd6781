//! Write-behind persistence into the relational store.
//!
//! Ingest hands messages to a bounded queue and moves on; a background
//! worker drains it with a fixed number of concurrent writes. The relational
//! copy may lag or fail without affecting live delivery or history, so
//! failures are only logged and counted.

use crate::metrics;
use crate::store::MessageStore;
use ridechat_protocol::ChatMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Write-behind configuration.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Messages that may wait for a worker before new ones are dropped.
    pub queue_capacity: usize,
    /// Maximum concurrent writes.
    pub workers: usize,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 8,
        }
    }
}

/// Producer side of the write-behind queue.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    sender: mpsc::Sender<ChatMessage>,
}

impl PersistQueue {
    /// Create a queue and the worker that drains it.
    ///
    /// The worker must be driven with [`PersistWorker::run`].
    #[must_use]
    pub fn channel(store: Arc<dyn MessageStore>, config: &PersistConfig) -> (Self, PersistWorker) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = PersistWorker {
            store,
            receiver,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
        };
        (Self { sender }, worker)
    }

    /// Create a queue and spawn its worker on the current runtime.
    #[must_use]
    pub fn spawn(store: Arc<dyn MessageStore>, config: &PersistConfig) -> Self {
        let (queue, worker) = Self::channel(store, config);
        tokio::spawn(worker.run());
        queue
    }

    /// Queue a message for persistence without waiting.
    ///
    /// Returns `false` if the message was dropped because the queue is full
    /// or the worker has stopped.
    pub fn enqueue(&self, message: ChatMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => {
                metrics::set_persist_queue_depth(self.depth());
                true
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(room = %message.room_id, "Persist queue full, skipping relational write");
                metrics::record_persist_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                error!(room = %message.room_id, "Persist worker stopped, skipping relational write");
                metrics::record_persist_dropped();
                false
            }
        }
    }

    /// Messages waiting for a worker.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Consumer side of the write-behind queue.
pub struct PersistWorker {
    store: Arc<dyn MessageStore>,
    receiver: mpsc::Receiver<ChatMessage>,
    permits: Arc<Semaphore>,
}

impl PersistWorker {
    /// Drain the queue until every [`PersistQueue`] handle is dropped,
    /// then wait for in-flight writes.
    pub async fn run(mut self) {
        let mut in_flight = JoinSet::new();

        while let Some(message) = self.receiver.recv().await {
            metrics::set_persist_queue_depth(self.receiver.len());

            // Reap finished writes so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}

            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let store = Arc::clone(&self.store);
            in_flight.spawn(async move {
                let _permit = permit;
                match store.save_message(&message).await {
                    Ok(()) => {
                        debug!(room = %message.room_id, seq = ?message.seq, "Persisted message");
                    }
                    Err(e) => {
                        error!(
                            room = %message.room_id,
                            seq = ?message.seq,
                            error = %e,
                            "Failed to persist message"
                        );
                        metrics::record_persist_failure();
                    }
                }
            });
        }

        while in_flight.join_next().await.is_some() {}
        info!("Persist worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageStore;

    #[tokio::test]
    async fn test_messages_are_persisted() {
        let store = Arc::new(MemoryMessageStore::new());
        let (queue, worker) = PersistQueue::channel(store.clone(), &PersistConfig::default());
        let handle = tokio::spawn(worker.run());

        assert!(queue.enqueue(ChatMessage::new("r1", "a")));
        assert!(queue.enqueue(ChatMessage::new("r1", "b")));
        drop(queue);
        handle.await.unwrap();

        let mut contents: Vec<_> = store.messages().into_iter().map(|m| m.content).collect();
        contents.sort();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let store = Arc::new(MemoryMessageStore::new());
        let config = PersistConfig {
            queue_capacity: 1,
            workers: 1,
        };
        let (queue, _worker) = PersistQueue::channel(store, &config);

        assert!(queue.enqueue(ChatMessage::new("r1", "a")));
        assert_eq!(queue.depth(), 1);
        assert!(!queue.enqueue(ChatMessage::new("r1", "b")));
    }

    #[tokio::test]
    async fn test_write_failures_are_contained() {
        let store = Arc::new(MemoryMessageStore::new());
        store.set_fail_writes(true);
        let (queue, worker) = PersistQueue::channel(store.clone(), &PersistConfig::default());
        let handle = tokio::spawn(worker.run());

        assert!(queue.enqueue(ChatMessage::new("r1", "a")));
        drop(queue);
        handle.await.unwrap();
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_worker_rejects() {
        let store = Arc::new(MemoryMessageStore::new());
        let (queue, worker) = PersistQueue::channel(store, &PersistConfig::default());
        drop(worker);
        assert!(!queue.enqueue(ChatMessage::new("r1", "a")));
    }
}
