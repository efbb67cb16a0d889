//! Client transports for MCP auditing.
//!
//! Every driver exposes the same contract: `connect`, `send`, `receive`,
//! `close`, plus state inspection. Drivers move opaque JSON frames; they
//! never interpret JSON-RPC semantics - that is the multiplexer's job.

pub mod error;
pub mod http;
pub mod message;
pub mod retry;
pub mod sse;
pub mod stdio;

use std::fmt;

use async_trait::async_trait;

pub use bellwether_core::sse::{SseDecoder, SseEvent};
pub use error::{TransportError, TransportErrorCategory, TransportResult};
pub use http::{HttpTransport, HttpTransportConfig};
pub use message::TransportMessage;
pub use retry::RetryPolicy;
pub use sse::{SseTransport, SseTransportConfig};
pub use stdio::{StdioTransport, StdioTransportConfig};

/// Which transport a driver implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Child process over stdin/stdout
    Stdio,
    /// HTTP POST per message
    Http,
    /// Server-sent events with POST upstream
    Sse,
    /// Streamable HTTP (single MCP endpoint, SSE or JSON responses)
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Not yet connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Ready to send and receive
    Connected,
    /// Shutting down
    Disconnecting,
    /// Terminally failed
    Failed {
        /// Why the transport failed
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// The core trait for all transport implementations.
///
/// Implementations are internally synchronized; `&self` methods may be
/// called from multiple tasks, though the session layer serializes sends.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Establish the connection to the remote endpoint.
    async fn connect(&self) -> TransportResult<()>;

    /// Send a single framed message.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Receive the next inbound message.
    ///
    /// Resolves to `Ok(Some(_))` for a decoded frame, `Ok(None)` when no
    /// message is currently available, and `Err(_)` on transport failure.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Close the connection and release resources.
    async fn close(&self) -> TransportResult<()>;

    /// Current lifecycle state.
    async fn state(&self) -> TransportState;

    /// Endpoint address or identifier, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Record the negotiated protocol version.
    ///
    /// HTTP transports echo it as `MCP-Protocol-Version` on subsequent
    /// requests; other transports ignore it.
    async fn set_protocol_version(&self, version: &str) {
        let _ = version;
    }
}
