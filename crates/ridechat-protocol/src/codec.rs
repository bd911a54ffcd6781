//! JSON codec for ridechat frames.
//!
//! Every frame is a single JSON document; the transport supplies framing.

use bytes::Bytes;
use thiserror::Error;

use crate::frames::{ChatMessage, FanoutEnvelope, InboundMessage};

/// Default maximum inbound frame size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a client frame, rejecting anything larger than `max_size` bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid inbound message.
pub fn decode_inbound(data: &[u8], max_size: usize) -> Result<InboundMessage, ProtocolError> {
    if data.len() > max_size {
        return Err(ProtocolError::FrameTooLarge {
            size: data.len(),
            max: max_size,
        });
    }
    Ok(serde_json::from_slice(data)?)
}

/// Encode a single live message frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(message: &ChatMessage) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Encode the history batch sent right after join.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_history(messages: &[ChatMessage]) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(messages)?))
}

/// Decode a message stored in the append-log.
///
/// # Errors
///
/// Returns an error if the entry is not a valid message.
pub fn decode_message(data: &[u8]) -> Result<ChatMessage, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a fanout payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_envelope(envelope: &FanoutEnvelope) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// Decode a fanout payload.
///
/// # Errors
///
/// Returns an error if the payload is not a valid envelope.
pub fn decode_envelope(data: &[u8]) -> Result<FanoutEnvelope, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Sequence;

    #[test]
    fn test_decode_inbound_client_fields() {
        let raw = br#"{"username":"bob","content":"hi","roomId":"X","senderId":"u1","avatar":1}"#;
        let msg = decode_inbound(raw, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.username.as_deref(), Some("bob"));
        assert_eq!(msg.sender_id.as_deref(), Some("u1"));
        assert_eq!(msg.room_id.as_deref(), Some("X"));
    }

    #[test]
    fn test_decode_inbound_too_large() {
        let raw = format!(r#"{{"content":"{}"}}"#, "a".repeat(100));
        match decode_inbound(raw.as_bytes(), 32) {
            Err(ProtocolError::FrameTooLarge { max: 32, .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_inbound_missing_content() {
        assert!(matches!(
            decode_inbound(br#"{"senderId":"u1"}"#, DEFAULT_MAX_FRAME_SIZE),
            Err(ProtocolError::Json(_))
        ));
        assert!(decode_inbound(b"not json", DEFAULT_MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn test_history_is_a_json_array() {
        let empty = encode_history(&[]).unwrap();
        assert_eq!(&empty[..], b"[]");

        let mut msg = ChatMessage::new("r1", "hi");
        msg.seq = Some(Sequence::new("1-0"));
        let batch = encode_history(&[msg]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&batch).unwrap();
        assert_eq!(value[0]["content"], "hi");
        assert_eq!(value[0]["seq"], "1-0");
    }

    #[test]
    fn test_envelope_decode_without_origin() {
        let payload = encode_message(&ChatMessage::new("r1", "hi")).unwrap();
        let env = decode_envelope(&payload).unwrap();
        assert_eq!(env.message.room_id, "r1");
        assert!(env.origin.is_none());
    }
}
