//! Broadcast dispatcher.
//!
//! The dispatcher is the single consumer of the fanout topic. For every
//! payload it takes a registry snapshot and queues the message on the
//! outbox of each connection in the message's room.

use crate::metrics;
use crate::registry::{ConnectionRegistry, Delivery};
use crate::store::{Fanout, FanoutStream};
use futures_util::StreamExt;
use ridechat_protocol::{codec, FanoutEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deliver messages back to the connection that sent them.
    pub echo_to_sender: bool,
    /// First delay before re-subscribing after the subscription is lost.
    pub initial_backoff: Duration,
    /// Upper bound for the re-subscribe delay.
    pub max_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Delivers fanout messages to registered connections.
pub struct Dispatcher {
    fanout: Arc<dyn Fanout>,
    registry: Arc<ConnectionRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        fanout: Arc<dyn Fanout>,
        registry: Arc<ConnectionRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            fanout,
            registry,
            config,
        }
    }

    /// Spawn the dispatcher on the current runtime.
    ///
    /// Start exactly one per process; without it messages are logged but
    /// never delivered live.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume the fanout topic for the lifetime of the process.
    ///
    /// A lost or failed subscription is retried with exponential backoff.
    pub async fn run(self) {
        let mut backoff = self.config.initial_backoff;

        loop {
            match self.fanout.subscribe().await {
                Ok(stream) => {
                    info!("Dispatcher subscribed to fanout");
                    backoff = self.config.initial_backoff;
                    self.drain(stream).await;
                    warn!("Fanout subscription ended");
                }
                Err(e) => {
                    warn!(error = %e, "Fanout subscribe failed");
                }
            }
            metrics::record_error("fanout_subscribe");

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    async fn drain(&self, mut stream: FanoutStream) {
        while let Some(payload) = stream.next().await {
            self.dispatch_payload(&payload);
        }
    }

    /// Decode and dispatch one raw fanout payload.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn dispatch_payload(&self, payload: &[u8]) -> usize {
        match codec::decode_envelope(payload) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable fanout payload");
                metrics::record_error("fanout_decode");
                0
            }
        }
    }

    /// Queue a message for every connection in its room.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn dispatch(&self, envelope: FanoutEnvelope) -> usize {
        let FanoutEnvelope { message, origin } = envelope;

        let frame = match codec::encode_message(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %message.room_id, error = %e, "Failed to encode message");
                metrics::record_error("encode");
                return 0;
            }
        };
        let bytes = frame.len();
        let delivery = Arc::new(Delivery { message, frame });
        let room = delivery.message.room_id.as_str();

        let mut delivered = 0;
        for (connection_id, registration) in self.registry.snapshot() {
            if registration.room != room {
                continue;
            }
            if !self.config.echo_to_sender && origin.as_deref() == Some(connection_id.as_str()) {
                continue;
            }

            match registration.outbox.try_send(Arc::clone(&delivery)) {
                Ok(()) => {
                    delivered += 1;
                    metrics::record_message(bytes, "outbound");
                }
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %connection_id, room = %room, "Outbox full, dropping message");
                    metrics::record_delivery_dropped("full");
                }
                Err(TrySendError::Closed(_)) => {
                    // The handler's read loop will notice and unregister.
                    debug!(connection = %connection_id, "Outbox closed");
                    metrics::record_delivery_dropped("closed");
                }
            }
        }

        trace!(room = %room, recipients = delivered, "Dispatched message");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::memory::MemoryFanout;
    use crate::registry::Registration;
    use crate::store::Fanout;
    use ridechat_protocol::ChatMessage;
    use tokio::sync::mpsc;

    fn join(
        registry: &ConnectionRegistry,
        id: &str,
        room: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<Delivery>> {
        let (tx, rx) = mpsc::channel(capacity);
        registry.register(
            ConnectionId::from(id),
            Registration {
                room: room.to_string(),
                identity: None,
                outbox: tx,
            },
        );
        rx
    }

    fn dispatcher(registry: Arc<ConnectionRegistry>, echo: bool) -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryFanout::new()),
            registry,
            DispatcherConfig {
                echo_to_sender: echo,
                ..Default::default()
            },
        )
    }

    fn envelope(room: &str, content: &str, origin: &str) -> FanoutEnvelope {
        FanoutEnvelope::new(ChatMessage::new(room, content), Some(origin.to_string()))
    }

    #[test]
    fn test_room_isolation() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a = join(&registry, "a", "r1", 8);
        let mut b = join(&registry, "b", "r1", 8);
        let mut c = join(&registry, "c", "r2", 8);

        let count = dispatcher(registry, true).dispatch(envelope("r1", "hi", "a"));
        assert_eq!(count, 2);

        // Echoed to the sender as well
        assert_eq!(a.try_recv().unwrap().message.content, "hi");
        assert_eq!(b.try_recv().unwrap().message.content, "hi");
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn test_echo_suppression() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a = join(&registry, "a", "r1", 8);
        let mut b = join(&registry, "b", "r1", 8);

        let count = dispatcher(registry, false).dispatch(envelope("r1", "hi", "a"));
        assert_eq!(count, 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_full_or_closed_outbox_does_not_block_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut slow = join(&registry, "slow", "r1", 1);
        let gone = join(&registry, "gone", "r1", 8);
        drop(gone);
        let mut ok = join(&registry, "ok", "r1", 8);

        let d = dispatcher(registry, true);
        assert_eq!(d.dispatch(envelope("r1", "one", "x")), 2);
        assert_eq!(d.dispatch(envelope("r1", "two", "x")), 1);

        assert_eq!(slow.try_recv().unwrap().message.content, "one");
        assert!(slow.try_recv().is_err());
        assert_eq!(ok.try_recv().unwrap().message.content, "one");
        assert_eq!(ok.try_recv().unwrap().message.content, "two");
    }

    #[test]
    fn test_unregistered_connection_not_delivered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a = join(&registry, "a", "r1", 8);
        registry.unregister(&"a".into());

        assert_eq!(dispatcher(registry, true).dispatch(envelope("r1", "hi", "b")), 0);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_bad_payload_is_skipped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let _a = join(&registry, "a", "r1", 8);
        assert_eq!(dispatcher(registry, true).dispatch_payload(b"{not json"), 0);
    }

    #[tokio::test]
    async fn test_run_consumes_fanout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut a = join(&registry, "a", "r1", 8);
        let fanout = Arc::new(MemoryFanout::new());

        let handle =
            Dispatcher::new(fanout.clone(), registry, DispatcherConfig::default()).spawn();
        while fanout.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        let payload = codec::encode_envelope(&envelope("r1", "live", "b")).unwrap();
        fanout.publish(payload).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), a.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message.content, "live");
        let frame: serde_json::Value = serde_json::from_slice(&delivery.frame).unwrap();
        assert_eq!(frame["roomId"], "r1");
        assert!(frame.get("origin").is_none());

        handle.abort();
    }
}
