//! Wire-level protocol layer for Bellwether.
//!
//! JSON-RPC 2.0 message types, the MCP request/response shapes the auditor
//! exercises, and protocol version negotiation with derived feature flags.
//!
//! Tool, prompt, and resource schemas are deliberately opaque
//! [`serde_json::Value`]s: the auditor fingerprints and diffs them, it does
//! not validate against them.

pub mod jsonrpc;
pub mod types;
pub mod version;

pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, RequestId, ResponseId,
    JSONRPC_VERSION,
};
pub use types::{
    CallToolRequest, CallToolResult, ClientCapabilities, ContentBlock, EmptyResult,
    GetPromptRequest, GetPromptResult, Implementation, InitializeRequest, InitializeResult,
    ListPromptsResult, ListResourcesResult, ListToolsResult, Prompt, PromptArgument,
    PromptMessage, PromptsCapabilities, ReadResourceRequest, ReadResourceResult, Resource,
    ResourceContents, ResourcesCapabilities, Role, ServerCapabilities, TextContent, Tool,
    ToolsCapabilities, methods,
};
pub use version::{FeatureFlags, ProtocolVersion, LATEST_PROTOCOL_VERSION, SUPPORTED_VERSIONS};
