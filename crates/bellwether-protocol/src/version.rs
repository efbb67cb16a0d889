//! Protocol version negotiation and derived feature flags.
//!
//! MCP versions are ISO dates, so lexicographic comparison doubles as
//! chronological comparison. The client offers the latest version it speaks;
//! whatever the server answers with becomes the session version, and the
//! feature flags for the session derive from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol versions this client knows how to speak, oldest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

/// The newest supported protocol version, offered during the handshake.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// An MCP protocol version (date-formatted string).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub String);

impl ProtocolVersion {
    /// The version offered in `initialize` requests.
    pub fn latest() -> Self {
        Self(LATEST_PROTOCOL_VERSION.to_string())
    }

    /// The version string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this client has explicit support for the version.
    pub fn is_supported(&self) -> bool {
        SUPPORTED_VERSIONS.contains(&self.0.as_str())
    }

    /// Feature flags implied by this version.
    pub fn features(&self) -> FeatureFlags {
        FeatureFlags {
            tool_annotations: self.0.as_str() >= "2025-03-26",
            session_header: self.0.as_str() >= "2025-03-26",
            protocol_version_header: self.0.as_str() >= "2025-06-18",
            structured_tool_output: self.0.as_str() >= "2025-06-18",
            task_notifications: self.0.as_str() >= "2025-11-25",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProtocolVersion {
    fn from(version: &str) -> Self {
        Self(version.to_string())
    }
}

/// Capabilities implied by a negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Tools may carry annotations (read-only/destructive/idempotent hints)
    pub tool_annotations: bool,
    /// HTTP transports exchange `Mcp-Session-Id`
    pub session_header: bool,
    /// HTTP transports must send `MCP-Protocol-Version` after negotiation
    pub protocol_version_header: bool,
    /// Tool results may carry `structuredContent`
    pub structured_tool_output: bool,
    /// Servers may emit task status notifications
    pub task_notifications: bool,
}
