//! Serialization and deserialization for the BoardSync wire protocol.
//!
//! Every frame is a single postcard-encoded [`ClientMessage`] or
//! [`ServerMessage`]. WebSocket preserves message boundaries, so no length
//! prefix is added.
//!
//! [`ClientMessage`]: crate::wire::ClientMessage
//! [`ServerMessage`]: crate::wire::ServerMessage

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame exceeds the allowed size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Encodes a protocol message into bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a protocol message from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a frame after checking it against a size limit.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` if `bytes` is longer than `max`, or
/// `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode_bounded<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    decode(bytes)
}
