//! HTTP client transport.
//!
//! Every outbound message becomes a POST to the MCP endpoint. Responses are
//! either immediate JSON (queued for the next `receive`), an SSE body whose
//! data frames are decoded and queued, or HTTP 202 for accepted
//! notifications. `Mcp-Session-Id` is captured from any response and echoed
//! on subsequent requests; a 404 after a session was established invalidates
//! the session id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode, header};
use tokio::sync::{Mutex as TokioMutex, RwLock, mpsc};
use tracing::{debug, trace, warn};

use bellwether_core::sse::SseDecoder;

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::{Transport, TransportKind, TransportState};

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL (e.g. `http://localhost:8080`)
    pub base_url: String,
    /// MCP endpoint path
    pub endpoint_path: String,
    /// Request timeout
    pub timeout: Duration,
    /// Per-read timeout while draining SSE response bodies
    pub read_timeout: Duration,
    /// Bearer token for `Authorization`
    pub auth_token: Option<String>,
    /// Additional headers sent on every request
    pub headers: HashMap<String, String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            endpoint_path: "/mcp".to_string(),
            timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            auth_token: None,
            headers: HashMap::new(),
        }
    }
}

/// HTTP POST-per-message transport.
pub struct HttpTransport {
    config: HttpTransportConfig,
    http_client: HttpClient,
    state: Arc<RwLock<TransportState>>,

    /// Negotiated protocol version, echoed as `MCP-Protocol-Version`
    protocol_version: Arc<RwLock<Option<String>>>,

    /// Session id captured from `Mcp-Session-Id` response headers
    session_id: Arc<RwLock<Option<String>>>,

    /// Message endpoint discovered via an SSE `endpoint` event, overriding
    /// the configured endpoint for POSTs
    message_endpoint: Arc<RwLock<Option<String>>>,

    /// Queue of inbound messages decoded from response bodies
    inbound_rx: Arc<TokioMutex<mpsc::Receiver<TransportMessage>>>,
    inbound_tx: mpsc::Sender<TransportMessage>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.config.base_url)
            .field("endpoint_path", &self.config.endpoint_path)
            .finish()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Configuration(format!("http client build: {e}")))?;

        let (inbound_tx, inbound_rx) = mpsc::channel(1000);

        Ok(Self {
            config,
            http_client,
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            protocol_version: Arc::new(RwLock::new(None)),
            session_id: Arc::new(RwLock::new(None)),
            message_endpoint: Arc::new(RwLock::new(None)),
            inbound_rx: Arc::new(TokioMutex::new(inbound_rx)),
            inbound_tx,
        })
    }

    /// Record the negotiated protocol version for subsequent headers.
    pub async fn set_protocol_version(&self, version: impl Into<String>) {
        *self.protocol_version.write().await = Some(version.into());
    }

    /// Session id captured from the server, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn endpoint_url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.endpoint_path)
    }

    /// Endpoint used for POSTs: discovered message endpoint when one was
    /// announced, the configured endpoint otherwise.
    pub(crate) async fn message_endpoint_url(&self) -> String {
        match self.message_endpoint.read().await.as_ref() {
            Some(endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {
                endpoint.clone()
            }
            Some(endpoint) if endpoint.starts_with('/') => {
                format!("{}{}", self.config.base_url, endpoint)
            }
            Some(endpoint) => format!("{}/{}", self.config.base_url, endpoint),
            None => self.endpoint_url(),
        }
    }

    /// Record an `endpoint` event announced by the server.
    pub(crate) async fn set_message_endpoint(&self, endpoint: impl Into<String>) {
        *self.message_endpoint.write().await = Some(endpoint.into());
    }

    pub(crate) fn http_client(&self) -> &HttpClient {
        &self.http_client
    }

    pub(crate) async fn store_session_id(&self, session_id: impl Into<String>) {
        *self.session_id.write().await = Some(session_id.into());
    }

    pub(crate) async fn build_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, text/event-stream"),
        );

        if let Some(version) = self.protocol_version.read().await.as_ref()
            && let Ok(value) = header::HeaderValue::from_str(version)
        {
            headers.insert("MCP-Protocol-Version", value);
        }

        if let Some(session_id) = self.session_id.read().await.as_ref()
            && let Ok(value) = header::HeaderValue::from_str(session_id)
        {
            headers.insert("Mcp-Session-Id", value);
        }

        if let Some(token) = &self.config.auth_token
            && let Ok(value) = header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(header::AUTHORIZATION, value);
        }

        for (key, value) in &self.config.headers {
            if let (Ok(k), Ok(v)) = (
                header::HeaderName::from_bytes(key.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(k, v);
            }
        }

        headers
    }

    async fn capture_session_id(&self, response: &reqwest::Response) {
        if let Some(session_id) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session_id) {
                debug!("captured session id: {}", session_id);
                *current = Some(session_id.to_string());
            }
        }
    }

    fn auth_error(response: &reqwest::Response) -> TransportError {
        TransportError::AuthFailed {
            status: Some(response.status().as_u16()),
            message: format!("server rejected request: {}", response.status()),
            www_authenticate: response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }

    /// Drain an SSE response body, queueing each data frame as a message.
    ///
    /// Every read is bounded by the configured read timeout.
    async fn drain_sse_body(
        &self,
        response: reqwest::Response,
        operation: &str,
    ) -> TransportResult<()> {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = match tokio::time::timeout(self.config.read_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    warn!("error reading SSE body: {}", e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(TransportError::Timeout {
                        operation: operation.to_string(),
                        timeout: self.config.read_timeout,
                    });
                }
            };

            for event in decoder.push(&chunk) {
                self.queue_sse_data(&event.data).await?;
            }
        }
        if let Some(event) = decoder.finish() {
            self.queue_sse_data(&event.data).await?;
        }
        Ok(())
    }

    pub(crate) async fn queue_sse_data(&self, data: &str) -> TransportResult<()> {
        if data.trim().is_empty() {
            return Ok(());
        }
        // The server claims this is a JSON-RPC message; a parse failure here
        // implicates the server, not the network.
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| TransportError::ProtocolViolation(format!("invalid JSON in SSE: {e}")))?;
        let message = TransportMessage::from_json(&value)?;
        self.inbound_tx
            .send(message)
            .await
            .map_err(|e| TransportError::ReceiveFailed(format!("inbound queue closed: {e}")))?;
        trace!("queued SSE message");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn connect(&self) -> TransportResult<()> {
        // HTTP is connectionless; readiness is established by the first POST.
        *self.state.write().await = TransportState::Connected;
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let url = self.message_endpoint_url().await;
        let headers = self.build_headers().await;
        let had_session = self.session_id.read().await.is_some();

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .header(header::CONTENT_TYPE, "application/json")
            .body(message.payload.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        operation: "http post".to_string(),
                        timeout: self.config.timeout,
                    }
                } else if e.is_connect() {
                    TransportError::ConnectionRefused(e.to_string())
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Self::auth_error(&response));
        }

        if status == StatusCode::NOT_FOUND && had_session {
            // Session expired server-side; drop the id so the session layer
            // can re-establish.
            *self.session_id.write().await = None;
            return Err(TransportError::ConnectionLost(
                "session expired (404), session id invalidated".to_string(),
            ));
        }

        if !status.is_success() {
            return Err(TransportError::SendFailed(format!("POST failed: {status}")));
        }

        self.capture_session_id(&response).await;

        // 202 Accepted: notification or response acknowledged, no body.
        if status == StatusCode::ACCEPTED {
            trace!("received 202 Accepted");
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("application/json") {
            let body = tokio::time::timeout(self.config.read_timeout, response.bytes())
                .await
                .map_err(|_| TransportError::Timeout {
                    operation: "http body read".to_string(),
                    timeout: self.config.read_timeout,
                })?
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            if body.is_empty() {
                return Ok(());
            }
            // Well-formed HTTP carrying broken JSON is a server bug.
            let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
                TransportError::ProtocolViolation(format!("invalid JSON response body: {e}"))
            })?;
            self.inbound_tx
                .send(TransportMessage::from_json(&value)?)
                .await
                .map_err(|e| TransportError::ReceiveFailed(format!("inbound queue closed: {e}")))?;
        } else if content_type.contains("text/event-stream") {
            self.drain_sse_body(response, "post sse read").await?;
        } else {
            debug!("ignoring response with content-type '{}'", content_type);
        }

        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut receiver = self.inbound_rx.lock().await;
        match receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::ReceiveFailed(
                "inbound queue disconnected".to_string(),
            )),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        // Terminate the session server-side when one was established.
        if let Some(session_id) = self.session_id.read().await.as_ref() {
            let mut headers = header::HeaderMap::new();
            if let Ok(value) = header::HeaderValue::from_str(session_id) {
                headers.insert("Mcp-Session-Id", value);
            }
            let _ = self
                .http_client
                .delete(self.endpoint_url())
                .headers(headers)
                .send()
                .await;
        }
        *self.state.write().await = TransportState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        self.state.read().await.clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.endpoint_url())
    }

    async fn set_protocol_version(&self, version: &str) {
        *self.protocol_version.write().await = Some(version.to_string());
    }
}
