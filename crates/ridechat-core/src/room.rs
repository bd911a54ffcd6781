//! Room identifiers.
//!
//! A room exists as soon as a connection or a message references it, so
//! there is no room type beyond its key.

/// Maximum room identifier length in bytes.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Room joined when the client does not name one.
pub const DEFAULT_ROOM: &str = "general";

/// A room identifier.
pub type RoomId = String;

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_room_id(room: &str) -> Result<(), &'static str> {
    if room.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if room.chars().any(char::is_control) {
        return Err("Room id contains control characters");
    }
    Ok(())
}

/// Append-log key for a room.
#[must_use]
pub fn stream_key(prefix: &str, room: &str) -> String {
    format!("{prefix}{room}")
}
