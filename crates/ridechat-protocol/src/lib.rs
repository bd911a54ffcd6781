//! # ridechat-protocol
//!
//! Wire types for the ridechat realtime service.
//!
//! Clients speak JSON over a WebSocket:
//!
//! - **Inbound** - one object per frame: `{ senderId?, content, timestamp? }`
//! - **Outbound** - on join a single array of recent messages, then one
//!   object per live message, each shaped like [`ChatMessage`]
//! - **Fanout** - the [`FanoutEnvelope`] published on the shared pub/sub topic
//!
//! ## Example
//!
//! ```rust
//! use ridechat_protocol::codec;
//!
//! let inbound = codec::decode_inbound(br#"{"content":"hi","roomId":"spoofed"}"#, 1024).unwrap();
//! assert_eq!(inbound.content, "hi");
//! ```

pub mod codec;
pub mod frames;

pub use codec::{ProtocolError, DEFAULT_MAX_FRAME_SIZE};
pub use frames::{ChatMessage, FanoutEnvelope, InboundMessage, Sequence};
