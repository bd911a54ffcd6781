//! # ridechat-core
//!
//! Room-scoped message distribution for the ridechat service.
//!
//! - **Registry** - live connections and the room each one joined
//! - **History** - recent messages replayed to a joining connection
//! - **Ingest** - validate, enrich, append, persist and publish one message
//! - **Dispatcher** - the single fanout subscriber that delivers to rooms
//! - **Persist** - bounded write-behind queue into the relational store
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐
//! │ Connection │──▶│   Ingest   │──▶│   Fanout   │──▶│ Dispatcher │
//! └────────────┘   └────────────┘   └────────────┘   └────────────┘
//!       ▲                │ append          │                │ snapshot
//!       │                ▼                 │                ▼
//!       │          ┌────────────┐   ┌────────────┐   ┌────────────┐
//!       │          │ AppendLog  │   │  Persist   │   │  Registry  │
//!       │          └────────────┘   └────────────┘   └────────────┘
//!       └──────────────────── outbox ─────────────────────────┘
//! ```

pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod history;
pub mod ingest;
pub mod memory;
pub mod metrics;
pub mod persist;
pub mod registry;
pub mod room;
pub mod store;

pub use auth::{AllowAnonymous, AuthError, Authenticator};
pub use connection::{ConnectionId, Identity};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use history::{HistoryLoader, DEFAULT_HISTORY_LIMIT};
pub use ingest::{IngestConfig, IngestContext, IngestError, IngestPipeline};
pub use persist::{PersistConfig, PersistQueue};
pub use registry::{ConnectionRegistry, Delivery, Outbox, Registration, RegistryStats};
pub use room::{validate_room_id, RoomId, DEFAULT_ROOM};
pub use store::{
    AppendLog, Fanout, FanoutError, FanoutStream, MessageStore, StoreError, UserProfile,
};
