//! # ridechat-server
//!
//! Realtime room chat for the ride-sharing app. Clients join a room over a
//! WebSocket, receive the room's recent history as one array frame, and
//! then receive every message sent to the room as individual frames.
//!
//! Messages are appended to a per-room Redis stream, published on a shared
//! pub/sub channel so every instance can deliver them, and written behind
//! to Postgres.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod postgres_store;
pub mod redis_store;
pub mod session;
pub mod state;

pub use config::Config;
pub use handlers::{router, run_server, serve};
pub use state::{AppState, Backends};
