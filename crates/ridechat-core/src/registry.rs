//! Connection registry.
//!
//! The registry is the authoritative map of live connections to the room
//! each one joined. It is the only in-process state shared between
//! connection handlers and the dispatcher, so all access goes through
//! [`ConnectionRegistry::register`], [`ConnectionRegistry::unregister`] and
//! [`ConnectionRegistry::snapshot`] under a single lock.

use crate::connection::{ConnectionId, Identity};
use crate::room::RoomId;
use bytes::Bytes;
use ridechat_protocol::ChatMessage;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// A message ready for delivery, encoded once and shared by every recipient.
#[derive(Debug)]
pub struct Delivery {
    /// The message being delivered.
    pub message: ChatMessage,
    /// The encoded outbound frame.
    pub frame: Bytes,
}

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<Arc<Delivery>>;

/// A connection's registry entry.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Room the connection joined.
    pub room: RoomId,
    /// Authenticated user, if any.
    pub identity: Option<Identity>,
    /// Queue drained by the connection's writer.
    pub outbox: Outbox,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub connection_count: usize,
    /// Number of rooms with at least one connection.
    pub room_count: usize,
    /// Connections that joined with a verified identity.
    pub authenticated_count: usize,
}

/// Thread-safe map of live connections to rooms.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Registration>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a connection with a room, replacing any prior association.
    pub fn register(&self, connection_id: ConnectionId, registration: Registration) {
        let room = registration.room.clone();
        let previous = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id.clone(), registration);

        match previous {
            Some(prev) if prev.room != room => {
                debug!(connection = %connection_id, from = %prev.room, to = %room, "Re-registered");
            }
            _ => debug!(connection = %connection_id, room = %room, "Registered"),
        }
    }

    /// Remove a connection. No-op if absent.
    ///
    /// Returns `true` if the connection was registered.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(connection_id);

        if let Some(reg) = &removed {
            debug!(connection = %connection_id, room = %reg.room, "Unregistered");
        }
        removed.is_some()
    }

    /// Point-in-time copy of every registration.
    ///
    /// Taken under the read lock, so it never reflects a half-applied
    /// register or unregister. Iteration order is unspecified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, Registration)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, reg)| (id.clone(), reg.clone()))
            .collect()
    }

    /// Connections currently registered to a room.
    #[must_use]
    pub fn members_of(&self, room: &str) -> Vec<ConnectionId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, reg)| reg.room == room)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let rooms: HashSet<&str> = entries.values().map(|reg| reg.room.as_str()).collect();
        RegistryStats {
            connection_count: entries.len(),
            room_count: rooms.len(),
            authenticated_count: entries.values().filter(|reg| reg.identity.is_some()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(room: &str) -> (Registration, mpsc::Receiver<Arc<Delivery>>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Registration {
                room: room.to_string(),
                identity: None,
                outbox: tx,
            },
            rx,
        )
    }

    #[test]
    fn test_register_unregister() {
        let registry = ConnectionRegistry::new();
        let (reg, _rx) = registration("r1");

        registry.register("conn-1".into(), reg);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.members_of("r1"), vec![ConnectionId::from("conn-1")]);

        assert!(registry.unregister(&"conn-1".into()));
        assert!(registry.is_empty());
        // Second removal is a no-op
        assert!(!registry.unregister(&"conn-1".into()));
    }

    #[test]
    fn test_register_replaces_room() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = registration("r1");
        let (second, _rx2) = registration("r2");

        registry.register("conn-1".into(), first);
        registry.register("conn-1".into(), second);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.room, "r2");
        assert!(registry.members_of("r1").is_empty());
    }

    #[test]
    fn test_members_and_stats() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = registration("r1");
        let (b, _rb) = registration("r1");
        let (mut c, _rc) = registration("r2");
        c.identity = Some(Identity::new("u1", "Ana", "driver"));

        registry.register("a".into(), a);
        registry.register("b".into(), b);
        registry.register("c".into(), c);

        let mut members = registry.members_of("r1");
        members.sort();
        assert_eq!(members, vec![ConnectionId::from("a"), ConnectionId::from("b")]);

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 3);
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.authenticated_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();

        for i in 0..64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let (reg, _rx) = registration(if i % 2 == 0 { "even" } else { "odd" });
                let id = ConnectionId::new(format!("conn-{i}"));
                registry.register(id.clone(), reg);
                let _ = registry.snapshot();
                if i % 4 == 0 {
                    registry.unregister(&id);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 48);
        let snapshot = registry.snapshot();
        for (id, reg) in &snapshot {
            assert!(registry.members_of(&reg.room).contains(id));
        }
    }
}
