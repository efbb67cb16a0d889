//! SSE and streamable-HTTP transport.
//!
//! A long-lived GET stream delivers server-initiated messages; outbound
//! messages still POST through the HTTP driver. The optional preflight GET
//! surfaces 401/403 as an immediate terminal authentication failure instead
//! of letting the first request time out.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{StatusCode, header};
use tokio::sync::{Mutex as TokioMutex, RwLock, mpsc};
use tracing::{debug, error, info, warn};

use bellwether_core::sse::SseDecoder;

use crate::error::{TransportError, TransportResult};
use crate::http::{HttpTransport, HttpTransportConfig};
use crate::message::TransportMessage;
use crate::retry::RetryPolicy;
use crate::{Transport, TransportKind, TransportState};

/// SSE transport configuration.
#[derive(Debug, Clone)]
pub struct SseTransportConfig {
    /// HTTP configuration shared with the POST path
    pub http: HttpTransportConfig,
    /// Perform a preflight GET before the stream is opened
    pub preflight: bool,
    /// Reconnect policy for the event stream
    pub retry: RetryPolicy,
    /// Whether this endpoint speaks legacy SSE or streamable HTTP
    pub kind: TransportKind,
}

impl Default for SseTransportConfig {
    fn default() -> Self {
        Self {
            http: HttpTransportConfig::default(),
            preflight: true,
            retry: RetryPolicy::default(),
            kind: TransportKind::StreamableHttp,
        }
    }
}

/// Long-lived SSE stream plus POST upstream.
pub struct SseTransport {
    config: SseTransportConfig,
    http: Arc<HttpTransport>,
    state: Arc<RwLock<TransportState>>,

    /// Server-initiated messages decoded from the GET stream
    sse_rx: Arc<TokioMutex<mpsc::Receiver<TransportMessage>>>,
    sse_tx: mpsc::Sender<TransportMessage>,

    /// Stream task handle
    stream_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("base_url", &self.config.http.base_url)
            .field("kind", &self.config.kind)
            .finish()
    }
}

impl SseTransport {
    /// Create a new SSE transport.
    pub fn new(config: SseTransportConfig) -> TransportResult<Self> {
        let http = Arc::new(HttpTransport::new(config.http.clone())?);
        let (sse_tx, sse_rx) = mpsc::channel(1000);

        Ok(Self {
            config,
            http,
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            sse_rx: Arc::new(TokioMutex::new(sse_rx)),
            sse_tx,
            stream_task: Arc::new(TokioMutex::new(None)),
        })
    }

    /// Record the negotiated protocol version for subsequent headers.
    pub async fn set_protocol_version(&self, version: impl Into<String>) {
        self.http.set_protocol_version(version).await;
    }

    fn stream_url(&self) -> String {
        format!(
            "{}{}",
            self.config.http.base_url, self.config.http.endpoint_path
        )
    }

    /// Preflight GET: authentication failures surface immediately rather
    /// than through a request timeout later.
    async fn preflight(&self) -> TransportResult<()> {
        let response = self
            .http
            .http_client()
            .get(self.stream_url())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::ConnectionRefused(e.to_string())
                } else if e.is_timeout() {
                    TransportError::Timeout {
                        operation: "preflight".to_string(),
                        timeout: self.config.http.timeout,
                    }
                } else {
                    TransportError::ConnectionLost(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::AuthFailed {
                status: Some(status.as_u16()),
                message: format!("preflight rejected: {status}"),
                www_authenticate: response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            });
        }
        // Anything else is tolerated: many streamable-HTTP servers only
        // accept POSTs on the endpoint.
        debug!("preflight returned {}", status);
        Ok(())
    }

    async fn start_stream_task(&self) {
        let url = self.stream_url();
        let http = Arc::clone(&self.http);
        let state = Arc::clone(&self.state);
        let sse_tx = self.sse_tx.clone();
        let retry = self.config.retry.clone();
        let read_timeout = self.config.http.read_timeout;

        let task = tokio::spawn(async move {
            stream_loop(url, http, state, sse_tx, retry, read_timeout).await;
        });
        *self.stream_task.lock().await = Some(task);
    }
}

/// Long-lived GET loop with reconnect.
async fn stream_loop(
    url: String,
    http: Arc<HttpTransport>,
    state: Arc<RwLock<TransportState>>,
    sse_tx: mpsc::Sender<TransportMessage>,
    retry: RetryPolicy,
    read_timeout: Duration,
) {
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            match retry.delay(attempt - 1) {
                Some(delay) => {
                    warn!("reconnecting event stream in {:?} (attempt {})", delay, attempt);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!("event stream retries exhausted");
                    *state.write().await = TransportState::Failed {
                        reason: "event stream retries exhausted".to_string(),
                    };
                    return;
                }
            }
        }

        let mut headers = http.build_headers().await;
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/event-stream"),
        );

        let response = match http.http_client().get(&url).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("event stream connect failed: {}", e);
                attempt += 1;
                continue;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("event stream rejected with {}", status);
            *state.write().await = TransportState::Failed {
                reason: format!("authentication failed: {status}"),
            };
            return;
        }
        if status == StatusCode::METHOD_NOT_ALLOWED {
            // POST-only streamable server; nothing to stream.
            debug!("server does not offer a GET event stream (405)");
            return;
        }
        if !status.is_success() {
            warn!("event stream connect returned {}", status);
            attempt += 1;
            continue;
        }

        if let Some(session_id) = response
            .headers()
            .get("Mcp-Session-Id")
            .and_then(|v| v.to_str().ok())
        {
            http.store_session_id(session_id).await;
        }

        info!("event stream established");
        *state.write().await = TransportState::Connected;
        attempt = 0;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = match tokio::time::timeout(read_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    warn!("error reading event stream: {}", e);
                    break;
                }
                Ok(None) => {
                    warn!("event stream ended");
                    break;
                }
                Err(_) => {
                    // Idle streams are normal; only the read is bounded.
                    continue;
                }
            };

            for event in decoder.push(&chunk) {
                match event.event.as_deref() {
                    Some("endpoint") => {
                        // Endpoint discovery: either {"uri": "..."} or a
                        // plain string.
                        let data = event.data.trim();
                        let endpoint = if data.starts_with('{') {
                            serde_json::from_str::<serde_json::Value>(data)
                                .ok()
                                .and_then(|v| v["uri"].as_str().map(String::from))
                        } else {
                            Some(data.to_string())
                        };
                        if let Some(endpoint) = endpoint {
                            info!("discovered message endpoint: {}", endpoint);
                            http.set_message_endpoint(endpoint).await;
                        } else {
                            warn!("malformed endpoint event: {}", data);
                        }
                    }
                    Some("message") | None => {
                        if event.data.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(&event.data) {
                            Ok(value) => {
                                let Ok(message) = TransportMessage::from_json(&value) else {
                                    continue;
                                };
                                if sse_tx.send(message).await.is_err() {
                                    debug!("SSE channel closed, stopping stream task");
                                    return;
                                }
                            }
                            Err(e) => warn!("invalid JSON in event stream: {}", e),
                        }
                    }
                    Some(other) => debug!("ignoring event type '{}'", other),
                }
            }
        }

        attempt += 1;
    }
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        self.config.kind
    }

    async fn connect(&self) -> TransportResult<()> {
        *self.state.write().await = TransportState::Connecting;

        if self.config.preflight
            && let Err(e) = self.preflight().await
        {
            if e.is_terminal() {
                *self.state.write().await = TransportState::Failed {
                    reason: e.to_string(),
                };
                return Err(e);
            }
            // Non-auth preflight failures are advisory; the stream task
            // retries on its own schedule.
            warn!("preflight failed (continuing): {}", e);
        }

        self.http.connect().await?;
        self.start_stream_task().await;
        *self.state.write().await = TransportState::Connected;
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.http.send(message).await
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        // Responses to our own POSTs take priority over server-initiated
        // stream messages.
        if let Some(message) = self.http.receive().await? {
            return Ok(Some(message));
        }

        let mut receiver = self.sse_rx.lock().await;
        match receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::ReceiveFailed(
                "SSE channel disconnected".to_string(),
            )),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        *self.state.write().await = TransportState::Disconnecting;
        if let Some(handle) = self.stream_task.lock().await.take() {
            handle.abort();
        }
        self.http.close().await?;
        *self.state.write().await = TransportState::Disconnected;
        Ok(())
    }

    async fn state(&self) -> TransportState {
        self.state.read().await.clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.stream_url())
    }

    async fn set_protocol_version(&self, version: &str) {
        self.http.set_protocol_version(version).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_default_config_enables_preflight() {
        let config = SseTransportConfig::default();
        assert!(config.preflight);
        assert_eq!(config.kind, TransportKind::StreamableHttp);
    }

    #[tokio::test]
    async fn test_kind_reflects_config() {
        let config = SseTransportConfig {
            kind: TransportKind::Sse,
            ..Default::default()
        };
        let transport = SseTransport::new(config).unwrap();
        assert_eq!(transport.kind(), TransportKind::Sse);
    }

    #[tokio::test]
    async fn test_preflight_connection_refused_is_not_terminal() {
        let config = SseTransportConfig {
            http: HttpTransportConfig {
                base_url: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        };
        let transport = SseTransport::new(config).unwrap();
        // Connection refused during preflight is advisory; connect proceeds
        // and leaves reconnection to the stream task.
        transport.connect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Connected);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_empty() {
        let transport = SseTransport::new(SseTransportConfig::default()).unwrap();
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = SseTransport::new(SseTransportConfig::default()).unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }
}
