//! JSON-RPC request/response multiplexer.
//!
//! A single background routing task is the sole consumer of
//! `transport.receive()`. It routes responses to waiting `request()` calls
//! through oneshot channels, forwards notifications to the notification
//! sink, and answers server-initiated requests with "method not found"
//! (this client audits servers; it offers no sampling or elicitation).
//!
//! Every request has exactly one outcome: the matching response, the
//! request-level timeout, a transport failure, or cancellation. Responses
//! may arrive out of order; notifications observed before a response are
//! queued into the sink before that response resolves its caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use bellwether_core::{AuditError, ErrorCode};
use bellwether_protocol::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
use bellwether_transport::{Transport, TransportMessage};

/// Receiver half of the notification sink.
pub type NotificationReceiver = mpsc::UnboundedReceiver<JsonRpcNotification>;

type PendingSender = oneshot::Sender<Result<JsonRpcResponse, AuditError>>;

/// JSON-RPC multiplexer over a single transport.
pub struct Multiplexer {
    transport: Arc<dyn Transport>,

    /// Monotonically increasing request id
    next_id: AtomicI64,

    /// Pending table: in-flight request id -> response waiter.
    /// Short-lived lock, never held across await.
    pending: Arc<StdMutex<HashMap<RequestId, PendingSender>>>,

    /// Outbound sends are serialized: one writer per session
    send_lock: tokio::sync::Mutex<()>,

    /// Shutdown signal for the routing task
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("transport", &self.transport.kind())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Multiplexer {
    /// Create a multiplexer and start its routing task.
    ///
    /// Returns the multiplexer and the receiver for server notifications.
    pub fn new(transport: Arc<dyn Transport>) -> (Arc<Self>, NotificationReceiver) {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        let mux = Arc::new(Self {
            transport,
            next_id: AtomicI64::new(1),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            send_lock: tokio::sync::Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        });

        Self::spawn_routing_task(&mux, notification_tx);
        (mux, notification_rx)
    }

    /// Issue a request and await its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, AuditError> {
        self.request_with_cancel(method, params, timeout, &CancellationToken::new())
            .await
    }

    /// Issue a request that can be cancelled externally.
    ///
    /// Cancellation removes the request from the pending table; a later
    /// response bearing its id is discarded.
    pub async fn request_with_cancel(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<JsonRpcResponse, AuditError> {
        if cancel.is_cancelled() {
            return Err(AuditError::cancelled(format!("{method} not started"))
                .with_component("multiplexer"));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = JsonRpcRequest::new(method, params, id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending mutex poisoned")
            .insert(id.clone(), tx);

        if let Err(e) = self.send_frame(&request).await {
            self.remove_pending(&id);
            return Err(e.with_operation(method));
        }
        trace!("sent request {} ({})", id, method);

        tokio::select! {
            () = cancel.cancelled() => {
                self.remove_pending(&id);
                debug!("request {} ({}) cancelled", id, method);
                Err(AuditError::cancelled(format!("{method} cancelled"))
                    .with_component("multiplexer")
                    .with_operation(method))
            }
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(result)) => result.map_err(|e| e.with_operation(method)),
                Ok(Err(_)) => {
                    // Waiter dropped without a value: routing task is gone.
                    self.remove_pending(&id);
                    Err(AuditError::new(
                        ErrorCode::TransportConnectionRefused,
                        "connection closed while awaiting response",
                    )
                    .with_component("multiplexer")
                    .with_operation(method))
                }
                Err(_) => {
                    self.remove_pending(&id);
                    Err(AuditError::new(
                        ErrorCode::TransportTimeout,
                        format!("{method} timed out after {timeout:?}"),
                    )
                    .with_component("multiplexer")
                    .with_operation(method))
                }
            }
        }
    }

    /// Send a notification (no id, no response).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), AuditError> {
        let notification = JsonRpcNotification::new(method, params);
        self.send_frame(&notification).await.map_err(|e| e.with_operation(method))
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("pending mutex poisoned").len()
    }

    /// Stop the routing task and fail all pending requests.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
        self.fail_all_pending(
            AuditError::cancelled("multiplexer shut down").with_component("multiplexer"),
        );
    }

    async fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), AuditError> {
        let message = TransportMessage::from_json(frame)
            .map_err(|e| AuditError::from(e).with_component("multiplexer"))?;
        let _guard = self.send_lock.lock().await;
        self.transport
            .send(message)
            .await
            .map_err(|e| AuditError::from(e).with_component("multiplexer"))
    }

    fn remove_pending(&self, id: &RequestId) {
        self.pending
            .lock()
            .expect("pending mutex poisoned")
            .remove(id);
    }

    fn fail_all_pending(&self, error: AuditError) {
        let waiters: Vec<PendingSender> = {
            let mut pending = self.pending.lock().expect("pending mutex poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn spawn_routing_task(
        mux: &Arc<Self>,
        notification_tx: mpsc::UnboundedSender<JsonRpcNotification>,
    ) {
        let transport = Arc::clone(&mux.transport);
        let mux = Arc::clone(mux);
        let shutdown = Arc::clone(&mux.shutdown);

        tokio::spawn(async move {
            debug!("multiplexer routing task started");
            let mut consecutive_errors = 0u32;

            loop {
                tokio::select! {
                    () = shutdown.notified() => {
                        debug!("multiplexer routing task shutting down");
                        break;
                    }
                    result = transport.receive() => match result {
                        Ok(Some(message)) => {
                            consecutive_errors = 0;
                            mux.route_message(message, &notification_tx).await;
                        }
                        Ok(None) => {
                            // Nothing available; avoid busy-waiting.
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            if e.is_terminal() || e.category() == bellwether_transport::TransportErrorCategory::ServerExit {
                                error!("transport failed terminally: {}", e);
                                mux.fail_all_pending(AuditError::from(e));
                                break;
                            }
                            if consecutive_errors == 1 {
                                error!("transport receive error: {}", e);
                            } else {
                                warn!("transport receive error (attempt {}): {}", consecutive_errors, e);
                            }
                            if consecutive_errors > 20 {
                                error!("giving up after repeated receive errors");
                                mux.fail_all_pending(AuditError::from(e));
                                break;
                            }
                            let delay = 100u64.saturating_mul(2u64.saturating_pow(consecutive_errors.min(5)));
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
            }
            debug!("multiplexer routing task terminated");
        });
    }

    async fn route_message(
        &self,
        message: TransportMessage,
        notification_tx: &mpsc::UnboundedSender<JsonRpcNotification>,
    ) {
        let parsed: JsonRpcMessage = match serde_json::from_slice(&message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("discarding invalid JSON-RPC frame: {}", e);
                return;
            }
        };

        match parsed {
            JsonRpcMessage::Response(response) => {
                let Some(id) = response.id.as_request_id().cloned() else {
                    warn!("received response with null id (parse error report)");
                    return;
                };
                let waiter = self
                    .pending
                    .lock()
                    .expect("pending mutex poisoned")
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        trace!("routing response for request {}", id);
                        let _ = tx.send(Ok(response));
                    }
                    None => {
                        // Cancelled or timed out; late responses are
                        // discarded, never delivered.
                        debug!("discarding response for unknown request {}", id);
                    }
                }
            }
            JsonRpcMessage::Notification(notification) => {
                trace!("routing notification {}", notification.method);
                let _ = notification_tx.send(notification);
            }
            JsonRpcMessage::Request(request) => {
                // Server-initiated requests are out of the auditor's scope;
                // answer with method-not-found so the server isn't left
                // hanging.
                debug!(
                    "rejecting server-initiated request '{}' (id {})",
                    request.method, request.id
                );
                let response = JsonRpcResponse::error_response(
                    JsonRpcError {
                        code: JsonRpcErrorCode::MethodNotFound.code(),
                        message: format!("Method not found: {}", request.method),
                        data: None,
                    },
                    request.id,
                );
                if let Err(e) = self.send_frame(&response).await {
                    warn!("failed to answer server request: {}", e);
                }
            }
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellwether_transport::StdioTransport;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// In-memory peer: reads frames from the multiplexer's transport and
    /// lets the test script responses.
    fn pipe_transport() -> (
        Arc<dyn Transport>,
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
    ) {
        let (client_write, server_read) = tokio::io::duplex(8192);
        let (server_write, client_read) = tokio::io::duplex(8192);
        let transport: Arc<dyn Transport> =
            Arc::new(StdioTransport::from_raw(client_read, client_write));
        (transport, server_read, server_write)
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let (transport, server_read, mut server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        // Echo server: replies to every request with its id
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                let reply = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": {"echo": request["method"]}
                });
                let mut frame = serde_json::to_vec(&reply).unwrap();
                frame.push(b'\n');
                server_write.write_all(&frame).await.unwrap();
            }
        });

        let response = mux
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.result().unwrap()["echo"], "tools/list");
        assert_eq!(mux.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (transport, server_read, mut server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        // Collect two requests, answer them in reverse order.
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let mut ids = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                ids.push(request["id"].clone());
                if ids.len() == 2 {
                    for id in ids.iter().rev() {
                        let reply = serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {"id": id}
                        });
                        let mut frame = serde_json::to_vec(&reply).unwrap();
                        frame.push(b'\n');
                        server_write.write_all(&frame).await.unwrap();
                    }
                    ids.clear();
                }
            }
        });

        let first = mux.request("a", None, Duration::from_secs(5));
        let second = mux.request("b", None, Duration::from_secs(5));
        let (first, second) = tokio::join!(first, second);

        // Each caller got the response bearing its own id.
        assert_eq!(first.unwrap().result().unwrap()["id"], 1);
        assert_eq!(second.unwrap().result().unwrap()["id"], 2);
    }

    #[tokio::test]
    async fn test_request_timeout_removes_pending() {
        let (transport, _server_read, _server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        let err = mux
            .request("slow/op", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportTimeout);
        assert_eq!(mux.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_removes_pending() {
        let (transport, _server_read, _server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        let cancel = CancellationToken::new();
        let pending = {
            let mux = Arc::clone(&mux);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                mux.request_with_cancel("never", None, Duration::from_secs(30), &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mux.in_flight(), 1);
        cancel.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(mux.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_sends() {
        let (transport, _server_read, _server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mux
            .request_with_cancel("never", None, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(mux.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_notifications_reach_sink() {
        let (transport, _server_read, mut server_write) = pipe_transport();
        let (_mux, mut notifications) = Multiplexer::new(transport);

        let frame =
            b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n".to_vec();
        server_write.write_all(&frame).await.unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_notification_delivered_before_response() {
        let (transport, server_read, mut server_write) = pipe_transport();
        let (mux, mut notifications) = Multiplexer::new(transport);

        // Server sends a notification, then the response, in one burst.
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            if let Ok(Some(line)) = lines.next_line().await {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                let burst = format!(
                    "{}\n{}\n",
                    serde_json::json!({"jsonrpc": "2.0", "method": "notifications/progress", "params": {"progress": 1}}),
                    serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}),
                );
                server_write.write_all(burst.as_bytes()).await.unwrap();
            }
        });

        mux.request("tools/call", None, Duration::from_secs(5))
            .await
            .unwrap();

        // The notification must already be queued in the sink.
        let notification = notifications.try_recv().unwrap();
        assert_eq!(notification.method, "notifications/progress");
    }

    #[tokio::test]
    async fn test_server_request_answered_method_not_found() {
        let (transport, server_read, mut server_write) = pipe_transport();
        let (_mux, _notifications) = Multiplexer::new(transport);

        let frame =
            b"{\"jsonrpc\":\"2.0\",\"id\":99,\"method\":\"sampling/createMessage\"}\n".to_vec();
        server_write.write_all(&frame).await.unwrap();

        let mut lines = BufReader::new(server_read).lines();
        let reply = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["id"], 99);
        assert_eq!(parsed["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_late_response_after_timeout_discarded() {
        let (transport, server_read, mut server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        let err = mux
            .request("slow", None, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportTimeout);

        // Deliver the response late; it must be dropped silently and a
        // subsequent request must still work.
        let mut lines = BufReader::new(server_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let request: serde_json::Value = serde_json::from_str(&line).unwrap();
        let late = format!(
            "{}\n",
            serde_json::json!({"jsonrpc": "2.0", "id": request["id"], "result": {}})
        );
        server_write.write_all(late.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mux.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let (transport, server_read, _server_write) = pipe_transport();
        let (mux, _notifications) = Multiplexer::new(transport);

        let _ = mux.request("a", None, Duration::from_millis(10)).await;
        let _ = mux.request("b", None, Duration::from_millis(10)).await;

        let mut lines = BufReader::new(server_read).lines();
        let first: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(second["id"].as_i64().unwrap() > first["id"].as_i64().unwrap());
    }
}
