//! Connection identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Counter that keeps generated ids unique within a process.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Random tag separating ids minted by different server instances.
static INSTANCE_TAG: OnceLock<String> = OnceLock::new();

fn instance_tag() -> &'static str {
    INSTANCE_TAG.get_or_init(|| Uuid::new_v4().simple().to_string()[..12].to_string())
}

/// Opaque handle for one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a connection ID, unique across server instances.
    ///
    /// Shape: `conn_<millis hex>_<instance tag>_<counter>`. The fanout origin
    /// is compared against this id, so two instances must never mint the same one.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{}_{counter}", instance_tag()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An authenticated user, as vouched for by an [`Authenticator`](crate::Authenticator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User identifier.
    pub user_id: String,
    /// Display name carried in the credential.
    pub name: String,
    /// Role (`passenger` or `driver` in the ride-sharing app).
    pub role: String,
}

impl Identity {
    /// Create an identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            role: role.into(),
        }
    }
}
