//! MCP protocol client.
//!
//! Performs the initialize handshake, adopts the server's offered protocol
//! version, and exposes the discovery and invocation surface the interview
//! scheduler drives. Every protocol method checks that initialization
//! completed first and fails with a typed protocol-state error otherwise.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bellwether_core::{AuditError, ErrorCode};
use bellwether_protocol::{
    CallToolRequest, CallToolResult, ClientCapabilities, FeatureFlags, GetPromptRequest,
    GetPromptResult, Implementation, InitializeRequest, InitializeResult, JsonRpcError,
    JsonRpcErrorCode, ListPromptsResult, ListResourcesResult, ListToolsResult, Prompt,
    ProtocolVersion, ReadResourceRequest, ReadResourceResult, Resource, ServerCapabilities, Tool,
    methods,
};
use bellwether_transport::Transport;

use crate::mux::{Multiplexer, NotificationReceiver};

/// MCP client configuration.
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Implementation info announced during the handshake
    pub client_info: Implementation,
    /// Per-request timeout applied at the multiplexer
    pub request_timeout: Duration,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation {
                name: "bellwether".to_string(),
                title: Some("Bellwether MCP Auditor".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Negotiated session state, fixed after the first successful handshake.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Server implementation info
    pub server_info: Implementation,
    /// Adopted protocol version
    pub protocol_version: ProtocolVersion,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Feature flags derived from the adopted version
    pub features: FeatureFlags,
}

/// Everything learned from a discovery pass. Immutable once built.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Server implementation info
    pub server_info: Implementation,
    /// Adopted protocol version
    pub protocol_version: ProtocolVersion,
    /// Sorted capability names
    pub capabilities: Vec<String>,
    /// Discovered tools
    pub tools: Vec<Tool>,
    /// Discovered prompts
    pub prompts: Vec<Prompt>,
    /// Discovered resources
    pub resources: Vec<Resource>,
    /// When discovery completed
    pub discovered_at: chrono::DateTime<chrono::Utc>,
}

/// MCP protocol client over a multiplexed transport.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    mux: Arc<Multiplexer>,
    config: McpClientConfig,
    session: StdMutex<Option<SessionInfo>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("transport", &self.transport.kind())
            .field(
                "initialized",
                &self.session.lock().expect("session mutex poisoned").is_some(),
            )
            .finish()
    }
}

impl McpClient {
    /// Connect the transport and build a client over it.
    ///
    /// Returns the client and the server-notification receiver.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        config: McpClientConfig,
    ) -> Result<(Self, NotificationReceiver), AuditError> {
        transport
            .connect()
            .await
            .map_err(|e| AuditError::from(e).with_operation("connect"))?;
        let (mux, notifications) = Multiplexer::new(Arc::clone(&transport));
        Ok((
            Self {
                transport,
                mux,
                config,
                session: StdMutex::new(None),
            },
            notifications,
        ))
    }

    /// Perform the initialize handshake.
    ///
    /// Offers the latest supported protocol version, adopts whatever the
    /// server answers with, and sends `notifications/initialized`. The
    /// negotiated version is fixed for the life of the session.
    pub async fn initialize(&self) -> Result<SessionInfo, AuditError> {
        if let Some(session) = self.session.lock().expect("session mutex poisoned").clone() {
            return Ok(session);
        }

        let request = InitializeRequest {
            protocol_version: ProtocolVersion::latest(),
            capabilities: ClientCapabilities::default(),
            client_info: self.config.client_info.clone(),
        };

        let response = self
            .mux
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&request).map_err(|e| {
                    AuditError::internal(format!("failed to serialize initialize: {e}"))
                })?),
                self.config.request_timeout,
            )
            .await?;

        let result: InitializeResult = parse_result(response, methods::INITIALIZE)?;

        let offered = result.protocol_version.clone();
        if !offered.is_supported() {
            warn!(
                "server offered unknown protocol version {}, adopting anyway",
                offered
            );
        }
        self.transport.set_protocol_version(offered.as_str()).await;

        self.mux.notify(methods::INITIALIZED, None).await?;

        let session = SessionInfo {
            server_info: result.server_info,
            features: offered.features(),
            protocol_version: offered,
            capabilities: result.capabilities,
        };
        info!(
            "initialized against {} v{} (protocol {})",
            session.server_info.name, session.server_info.version, session.protocol_version
        );
        *self.session.lock().expect("session mutex poisoned") = Some(session.clone());
        Ok(session)
    }

    /// Negotiated session info, if the handshake completed.
    pub fn session(&self) -> Option<SessionInfo> {
        self.session.lock().expect("session mutex poisoned").clone()
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<(), AuditError> {
        self.ensure_ready()?;
        self.mux
            .request(methods::PING, None, self.config.request_timeout)
            .await?
            .into_result()
            .map(|_| ())
            .map_err(|e| rpc_error_to_audit(methods::PING, &e))
    }

    /// List all tools, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, AuditError> {
        self.ensure_ready()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self
                .mux
                .request(methods::TOOLS_LIST, params, self.config.request_timeout)
                .await?;
            let page: ListToolsResult = parse_result(response, methods::TOOLS_LIST)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Call a tool.
    ///
    /// An `isError` result is returned as `Ok`: the tool ran and reported a
    /// failure, which is signal for the interview, not an exception.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult, AuditError> {
        self.ensure_ready()?;
        let request = CallToolRequest {
            name: name.to_string(),
            arguments: arguments.map(|map| map.into_iter().collect()),
        };
        let response = self
            .mux
            .request_with_cancel(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(&request).map_err(|e| {
                    AuditError::internal(format!("failed to serialize tool call: {e}"))
                })?),
                self.config.request_timeout,
                cancel,
            )
            .await?;
        parse_result(response, methods::TOOLS_CALL)
    }

    /// List all prompts, following pagination cursors.
    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, AuditError> {
        self.ensure_ready()?;
        let mut prompts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self
                .mux
                .request(methods::PROMPTS_LIST, params, self.config.request_timeout)
                .await?;
            let page: ListPromptsResult = parse_result(response, methods::PROMPTS_LIST)?;
            prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(prompts)
    }

    /// Render a prompt with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<GetPromptResult, AuditError> {
        self.ensure_ready()?;
        let request = GetPromptRequest {
            name: name.to_string(),
            arguments: arguments.map(|map| map.into_iter().collect()),
        };
        let response = self
            .mux
            .request(
                methods::PROMPTS_GET,
                Some(serde_json::to_value(&request).map_err(|e| {
                    AuditError::internal(format!("failed to serialize prompt get: {e}"))
                })?),
                self.config.request_timeout,
            )
            .await?;
        parse_result(response, methods::PROMPTS_GET)
    }

    /// List all resources, following pagination cursors.
    pub async fn list_resources(&self) -> Result<Vec<Resource>, AuditError> {
        self.ensure_ready()?;
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self
                .mux
                .request(methods::RESOURCES_LIST, params, self.config.request_timeout)
                .await?;
            let page: ListResourcesResult = parse_result(response, methods::RESOURCES_LIST)?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(resources)
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, AuditError> {
        self.ensure_ready()?;
        let request = ReadResourceRequest {
            uri: uri.to_string(),
        };
        let response = self
            .mux
            .request(
                methods::RESOURCES_READ,
                Some(serde_json::to_value(&request).map_err(|e| {
                    AuditError::internal(format!("failed to serialize resource read: {e}"))
                })?),
                self.config.request_timeout,
            )
            .await?;
        parse_result(response, methods::RESOURCES_READ)
    }

    /// Full discovery pass: tools, prompts, and resources, gated by the
    /// capabilities the server advertised.
    pub async fn discover(&self) -> Result<Discovery, AuditError> {
        let session = self.initialize().await?;

        let tools = if session.capabilities.tools.is_some() {
            self.list_tools().await?
        } else {
            debug!("server does not advertise tools");
            Vec::new()
        };
        let prompts = if session.capabilities.prompts.is_some() {
            self.list_prompts().await?
        } else {
            Vec::new()
        };
        let resources = if session.capabilities.resources.is_some() {
            self.list_resources().await?
        } else {
            Vec::new()
        };

        info!(
            "discovered {} tools, {} prompts, {} resources",
            tools.len(),
            prompts.len(),
            resources.len()
        );

        Ok(Discovery {
            server_info: session.server_info,
            protocol_version: session.protocol_version,
            capabilities: session.capabilities.names(),
            tools,
            prompts,
            resources,
            discovered_at: chrono::Utc::now(),
        })
    }

    /// Shut down the multiplexer and close the transport.
    pub async fn close(&self) -> Result<(), AuditError> {
        self.mux.shutdown();
        self.transport
            .close()
            .await
            .map_err(|e| AuditError::from(e).with_operation("close"))
    }

    fn ensure_ready(&self) -> Result<(), AuditError> {
        if self.session.lock().expect("session mutex poisoned").is_some() {
            Ok(())
        } else {
            Err(AuditError::new(
                ErrorCode::ProtocolNotInitialized,
                "protocol method called before initialize completed",
            )
            .with_component("mcp-client"))
        }
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(
    response: bellwether_protocol::JsonRpcResponse,
    method: &str,
) -> Result<T, AuditError> {
    let result = response
        .into_result()
        .map_err(|e| rpc_error_to_audit(method, &e))?;
    serde_json::from_value(result).map_err(|e| {
        AuditError::new(
            ErrorCode::ProtocolInvalidResponse,
            format!("failed to parse {method} result: {e}"),
        )
        .with_component("mcp-client")
        .with_operation(method)
    })
}

fn rpc_error_to_audit(method: &str, error: &JsonRpcError) -> AuditError {
    let code = match JsonRpcErrorCode::from(error.code) {
        JsonRpcErrorCode::MethodNotFound => ErrorCode::ProtocolUnknownMethod,
        _ => ErrorCode::ProtocolInvalidResponse,
    };
    AuditError::new(code, format!("{method} failed: {error}"))
        .with_component("mcp-client")
        .with_operation(method)
        .with_metadata("rpc_code", serde_json::json!(error.code))
}
