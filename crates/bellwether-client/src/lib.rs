//! MCP client layer for Bellwether.
//!
//! The [`Multiplexer`] owns the transport's inbound stream, correlating
//! responses with in-flight requests and routing notifications; the
//! [`McpClient`] sits on top of it and speaks the MCP protocol: handshake,
//! version negotiation, capability discovery, and tool/prompt/resource
//! calls.

pub mod client;
pub mod mux;

pub use client::{Discovery, McpClient, McpClientConfig, SessionInfo};
pub use mux::{Multiplexer, NotificationReceiver};
