//! JSON encoding of realtime channel frames.
//!
//! Frames travel as WebSocket text frames. Decoding never panics: unknown
//! frame types, missing fields, and invalid JSON all come back as
//! [`CodecError::Malformed`] so the caller can log and drop the frame.

use crate::envelope::{InboundEvent, OutboundEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is not valid JSON or does not match any known frame shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Encodes a client frame as JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_outbound(frame: &OutboundEvent) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a server frame as JSON text.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode_inbound(frame: &InboundEvent) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a server frame from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a known frame.
pub fn decode_inbound(text: &str) -> Result<InboundEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decodes a client frame from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a known frame.
pub fn decode_outbound(text: &str) -> Result<OutboundEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}
