//! Transport error types and the failure-category taxonomy.

use std::time::Duration;
use thiserror::Error;

use bellwether_core::{AuditError, ErrorCode};

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Coarse classification used by retry logic and user-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorCategory {
    /// Remote endpoint refused or dropped the connection
    ConnectionRefused,
    /// Peer sent bytes that violate the framing or JSON contract
    ProtocolViolation,
    /// Authentication rejected (401/403)
    AuthFailed,
    /// Child server process exited
    ServerExit,
    /// I/O did not complete within its deadline
    Timeout,
    /// Anything else
    Unknown,
}

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Authentication with the remote endpoint failed.
    #[error("Authentication failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    AuthFailed {
        /// HTTP status that triggered the failure, if any
        status: Option<u16>,
        /// Human-readable detail
        message: String,
        /// `WWW-Authenticate` header value, surfaced verbatim for re-auth
        www_authenticate: Option<String>,
    },

    /// The child server process exited unexpectedly.
    #[error("Server process exited{}", code.map(|c| format!(" with code {c}")).unwrap_or_default())]
    ServerExit {
        /// Process exit code, if the process exited normally
        code: Option<i32>,
        /// Tail of the captured stderr ring buffer
        stderr_tail: String,
    },

    /// The peer sent a payload that violates the framing or JSON contract.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation did not complete within the specified timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Category for retry logic and diagnostics.
    pub fn category(&self) -> TransportErrorCategory {
        match self {
            Self::ConnectionRefused(_) | Self::ConnectionLost(_) => {
                TransportErrorCategory::ConnectionRefused
            }
            Self::AuthFailed { .. } => TransportErrorCategory::AuthFailed,
            Self::ServerExit { .. } => TransportErrorCategory::ServerExit,
            Self::ProtocolViolation(_) => TransportErrorCategory::ProtocolViolation,
            Self::Timeout { .. } => TransportErrorCategory::Timeout,
            Self::SendFailed(_) | Self::ReceiveFailed(_) | Self::Configuration(_) | Self::Io(_) => {
                TransportErrorCategory::Unknown
            }
        }
    }

    /// True when the failure points at a server bug rather than the network.
    ///
    /// JSON parse failures of otherwise well-formed responses implicate the
    /// server; connection-level failures do not.
    pub fn likely_server_bug(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    /// True when the session layer should treat this error as fatal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed { .. } | Self::ServerExit { .. } | Self::Configuration(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl From<TransportError> for AuditError {
    fn from(err: TransportError) -> Self {
        let code = match err.category() {
            TransportErrorCategory::ConnectionRefused => ErrorCode::TransportConnectionRefused,
            TransportErrorCategory::AuthFailed => ErrorCode::TransportAuthFailed,
            TransportErrorCategory::ServerExit => ErrorCode::TransportServerExit,
            TransportErrorCategory::ProtocolViolation => ErrorCode::TransportProtocolViolation,
            TransportErrorCategory::Timeout => ErrorCode::TransportTimeout,
            TransportErrorCategory::Unknown => ErrorCode::TransportConnectionRefused,
        };
        let mut audit = AuditError::new(code, err.to_string()).with_component("transport");
        audit = audit.with_metadata(
            "likely_server_bug",
            serde_json::Value::Bool(err.likely_server_bug()),
        );
        if let TransportError::AuthFailed {
            www_authenticate: Some(challenge),
            ..
        } = &err
        {
            audit = audit.with_metadata(
                "www_authenticate",
                serde_json::Value::String(challenge.clone()),
            );
        }
        audit
    }
}
