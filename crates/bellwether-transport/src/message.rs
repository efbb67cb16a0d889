//! Framed message moved by transports.

use bytes::Bytes;

use crate::error::{TransportError, TransportResult};

/// A single framed message, opaque to the transport layer.
///
/// The payload is the raw JSON text of one JSON-RPC message. Transports
/// validate that it parses as JSON (and, for stdio, that it contains no
/// embedded newlines) but never look at its semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Raw message bytes
    pub payload: Bytes,
}

impl TransportMessage {
    /// Wrap raw bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Serialize a value into a message frame.
    pub fn from_json<T: serde::Serialize>(value: &T) -> TransportResult<Self> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| TransportError::SendFailed(format!("serialization failed: {e}")))?;
        Ok(Self::new(payload))
    }

    /// Parse the payload as a JSON value.
    pub fn to_json(&self) -> TransportResult<serde_json::Value> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| TransportError::ProtocolViolation(format!("invalid JSON frame: {e}")))
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Payload as UTF-8 text, if valid.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_round_trip() {
        let message = TransportMessage::from_json(&json!({"jsonrpc": "2.0", "id": 1})).unwrap();
        let value = message.to_json().unwrap();
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_invalid_json_is_protocol_violation() {
        let message = TransportMessage::new("not json");
        let err = message.to_json().unwrap_err();
        assert!(err.likely_server_bug());
    }

    #[test]
    fn test_size_and_text() {
        let message = TransportMessage::new("{}");
        assert_eq!(message.size(), 2);
        assert_eq!(message.as_text(), Some("{}"));
    }
}
