//! Child-process stdio transport.
//!
//! Spawns the target MCP server with a controlled argv and environment and
//! frames messages as newline-delimited JSON on its stdin/stdout. Stderr is
//! captured separately into a bounded ring buffer; when the process exits
//! unexpectedly the terminal error carries the exit code and a stderr tail.
//!
//! Locking follows the hybrid pattern: `std::sync::Mutex` for state that
//! never crosses `.await`, `tokio::sync::Mutex` for I/O halves that do.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::{Transport, TransportKind, TransportState};

type BoxedWriter = FramedWrite<std::pin::Pin<Box<dyn AsyncWrite + Send + 'static>>, LinesCodec>;

/// Default number of stderr lines retained in the ring buffer.
const DEFAULT_STDERR_CAPACITY: usize = 100;

/// Number of stderr lines included in `ServerExit` errors.
const STDERR_TAIL_LINES: usize = 20;

/// Configuration for spawning the target server process.
#[derive(Debug, Clone)]
pub struct StdioTransportConfig {
    /// Executable to spawn
    pub command: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Environment variables set for the child
    pub env: HashMap<String, String>,
    /// When true, the child does not inherit this process's environment
    pub clear_env: bool,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
    /// Stderr ring buffer capacity, in lines
    pub stderr_capacity: usize,
}

impl Default for StdioTransportConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            clear_env: false,
            cwd: None,
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
        }
    }
}

impl StdioTransportConfig {
    /// Configuration for the given command line.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Default::default()
        }
    }
}

/// Stdio transport over a spawned child process.
pub struct StdioTransport {
    config: StdioTransportConfig,

    /// Transport state (never locked across await)
    state: Arc<StdMutex<TransportState>>,

    /// The spawned child, kept for exit-status inspection and kill on close
    child: Arc<TokioMutex<Option<Child>>>,

    /// Framed writer over the child's stdin
    writer: Arc<TokioMutex<Option<BoxedWriter>>>,

    /// Inbound message channel fed by the reader task
    receive_channel: Arc<TokioMutex<Option<mpsc::Receiver<TransportMessage>>>>,

    /// Captured stderr lines, bounded
    stderr_buffer: Arc<StdMutex<VecDeque<String>>>,

    /// Background task handles
    reader_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
    stderr_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("args", &self.config.args)
            .field("state", &self.state)
            .finish()
    }
}

impl StdioTransport {
    /// Create a transport that will spawn the configured server on connect.
    pub fn new(config: StdioTransportConfig) -> Self {
        Self {
            config,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            child: Arc::new(TokioMutex::new(None)),
            writer: Arc::new(TokioMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            stderr_buffer: Arc::new(StdMutex::new(VecDeque::new())),
            reader_task: Arc::new(TokioMutex::new(None)),
            stderr_task: Arc::new(TokioMutex::new(None)),
        }
    }

    /// Create a transport over raw streams instead of a spawned process.
    ///
    /// `reader` is what we read inbound frames from and `writer` is what we
    /// write outbound frames to. Used by tests with in-memory duplex pipes.
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1000);
        let boxed_writer: std::pin::Pin<Box<dyn AsyncWrite + Send>> = Box::pin(writer);
        let boxed_reader: std::pin::Pin<Box<dyn AsyncRead + Send>> = Box::pin(reader);
        let handle = tokio::spawn(Self::read_loop(
            FramedRead::new(BufReader::new(boxed_reader), LinesCodec::new()),
            tx,
        ));

        Self {
            config: StdioTransportConfig::default(),
            state: Arc::new(StdMutex::new(TransportState::Connected)),
            child: Arc::new(TokioMutex::new(None)),
            writer: Arc::new(TokioMutex::new(Some(FramedWrite::new(
                boxed_writer,
                LinesCodec::new(),
            )))),
            receive_channel: Arc::new(TokioMutex::new(Some(rx))),
            stderr_buffer: Arc::new(StdMutex::new(VecDeque::new())),
            reader_task: Arc::new(TokioMutex::new(Some(handle))),
            stderr_task: Arc::new(TokioMutex::new(None)),
        }
    }

    /// Tail of the captured stderr, most recent lines last.
    pub fn stderr_tail(&self) -> String {
        let buffer = self.stderr_buffer.lock().expect("stderr mutex poisoned");
        let skip = buffer.len().saturating_sub(STDERR_TAIL_LINES);
        buffer
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("stdio transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    fn serialize_frame(message: &TransportMessage) -> TransportResult<String> {
        let json_str = message
            .as_text()
            .ok_or_else(|| TransportError::SendFailed("payload is not valid UTF-8".to_string()))?;

        // Newline-delimited framing: embedded newlines would split the frame.
        if json_str.contains('\n') || json_str.contains('\r') {
            return Err(TransportError::SendFailed(
                "message contains embedded newlines".to_string(),
            ));
        }

        let _: serde_json::Value = serde_json::from_str(json_str)
            .map_err(|e| TransportError::SendFailed(format!("payload is not JSON: {e}")))?;

        Ok(json_str.to_string())
    }

    async fn read_loop(
        mut reader: FramedRead<BufReader<std::pin::Pin<Box<dyn AsyncRead + Send>>>, LinesCodec>,
        sender: mpsc::Sender<TransportMessage>,
    ) {
        while let Some(result) = reader.next().await {
            match result {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    // Servers sometimes write plain-text logs to stdout;
                    // skip anything that is not a JSON frame.
                    if serde_json::from_str::<serde_json::Value>(&line).is_err() {
                        warn!("skipping non-JSON line on stdout: {}", truncate(&line, 120));
                        continue;
                    }
                    trace!("received frame ({} bytes)", line.len());
                    if sender.send(TransportMessage::new(line)).await.is_err() {
                        debug!("receive channel closed, stopping reader task");
                        return;
                    }
                }
                Err(e) => {
                    error!("failed to read from server stdout: {}", e);
                    break;
                }
            }
        }
        debug!("stdio reader task completed");
    }

    async fn spawn_child(&self) -> TransportResult<()> {
        if self.config.command.is_empty() {
            return Err(TransportError::Configuration(
                "server command is empty".to_string(),
            ));
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if self.config.clear_env {
            command.env_clear();
        }
        command.envs(&self.config.env);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            TransportError::ConnectionRefused(format!(
                "failed to spawn '{}': {e}",
                self.config.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Configuration("child stdin was not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Configuration("child stdout was not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Configuration("child stderr was not piped".into()))?;

        let boxed_stdin: std::pin::Pin<Box<dyn AsyncWrite + Send>> = Box::pin(stdin);
        *self.writer.lock().await = Some(FramedWrite::new(boxed_stdin, LinesCodec::new()));

        let (tx, rx) = mpsc::channel(1000);
        *self.receive_channel.lock().await = Some(rx);

        let boxed_stdout: std::pin::Pin<Box<dyn AsyncRead + Send>> = Box::pin(stdout);
        let reader = FramedRead::new(BufReader::new(boxed_stdout), LinesCodec::new());
        *self.reader_task.lock().await = Some(tokio::spawn(Self::read_loop(reader, tx)));

        // Stderr drains into the ring buffer regardless of message flow.
        let stderr_buffer = Arc::clone(&self.stderr_buffer);
        let capacity = self.config.stderr_capacity;
        *self.stderr_task.lock().await = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buffer = stderr_buffer.lock().expect("stderr mutex poisoned");
                if buffer.len() >= capacity {
                    buffer.pop_front();
                }
                buffer.push_back(line);
            }
        }));

        *self.child.lock().await = Some(child);
        Ok(())
    }

    /// Exit code of the child, waiting briefly for it to be reapable.
    ///
    /// Stdout EOF can race the process becoming waitable, so a bounded
    /// wait beats `try_wait` here.
    async fn child_exit_code(&self) -> Option<i32> {
        let mut child_guard = self.child.lock().await;
        let child = child_guard.as_mut()?;
        match tokio::time::timeout(std::time::Duration::from_millis(500), child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Connected) {
            return Ok(());
        }
        self.set_state(TransportState::Connecting);

        match self.spawn_child().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                debug!("stdio transport connected: {}", self.config.command);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!("failed to connect stdio transport: {}", e);
                Err(e)
            }
        }
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::SendFailed(format!(
                "transport not connected: {state}"
            )));
        }

        let frame = Self::serialize_frame(&message)?;
        let size = frame.len();

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::SendFailed(
                "stdin writer not available".to_string(),
            ));
        };

        if let Err(e) = writer.send(frame).await {
            // A write failure usually means the child died; surface that.
            if let Some(code) = self.child_exit_code().await {
                let err = TransportError::ServerExit {
                    code: Some(code),
                    stderr_tail: self.stderr_tail(),
                };
                self.set_state(TransportState::Failed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
            self.set_state(TransportState::Failed {
                reason: e.to_string(),
            });
            return Err(TransportError::SendFailed(e.to_string()));
        }
        SinkExt::<String>::flush(writer)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        trace!("sent frame ({} bytes)", size);
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut channel = self.receive_channel.lock().await;
        let Some(receiver) = channel.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "receive channel not available".to_string(),
            ));
        };

        match receiver.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                // Reader hit EOF; distinguish clean shutdown from a crash.
                drop(channel);
                let code = self.child_exit_code().await;
                let err = TransportError::ServerExit {
                    code,
                    stderr_tail: self.stderr_tail(),
                };
                self.set_state(TransportState::Failed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }
        self.set_state(TransportState::Disconnecting);

        *self.writer.lock().await = None;
        *self.receive_channel.lock().await = None;

        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr_task.lock().await.take() {
            handle.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        self.set_state(TransportState::Disconnected);
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("stdio://{}", self.config.command))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialize_frame_validates_json() {
        let ok = TransportMessage::new(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        assert!(StdioTransport::serialize_frame(&ok).is_ok());

        let bad = TransportMessage::new("not json");
        assert!(matches!(
            StdioTransport::serialize_frame(&bad),
            Err(TransportError::SendFailed(_))
        ));
    }

    #[test]
    fn test_serialize_frame_rejects_embedded_newlines() {
        let with_lf = TransportMessage::new("{\"a\":\n1}");
        assert!(StdioTransport::serialize_frame(&with_lf).is_err());

        let with_cr = TransportMessage::new("{\r\"a\":1}");
        assert!(StdioTransport::serialize_frame(&with_cr).is_err());

        // Escaped newlines (two characters, backslash + n) are fine
        let escaped = TransportMessage::new(r#"{"text":"line1\nline2"}"#);
        assert!(StdioTransport::serialize_frame(&escaped).is_ok());
    }

    #[test]
    fn test_stderr_tail_bounded() {
        let transport = StdioTransport::new(StdioTransportConfig::default());
        {
            let mut buffer = transport.stderr_buffer.lock().unwrap();
            for i in 0..50 {
                buffer.push_back(format!("line {i}"));
            }
        }
        let tail = transport.stderr_tail();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(*lines.last().unwrap(), "line 49");
    }

    #[tokio::test]
    async fn test_connect_missing_command_fails() {
        let transport = StdioTransport::new(StdioTransportConfig::default());
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_connect_nonexistent_binary_is_refused() {
        let transport = StdioTransport::new(StdioTransportConfig::new(
            "/nonexistent/bellwether-test-binary",
            vec![],
        ));
        let err = transport.connect().await.unwrap_err();
        assert_eq!(
            err.category(),
            crate::TransportErrorCategory::ConnectionRefused
        );
        assert!(matches!(
            transport.state().await,
            TransportState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_raw_round_trip() {
        let (client_write, server_read) = tokio::io::duplex(4096);
        let (server_write, client_read) = tokio::io::duplex(4096);

        let client = StdioTransport::from_raw(client_read, client_write);
        let server = StdioTransport::from_raw(server_read, server_write);

        let frame = TransportMessage::new(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        client.send(frame.clone()).await.unwrap();

        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(received.to_json().unwrap()["method"], "ping");
    }

    #[tokio::test]
    async fn test_raw_frames_end_with_newline() {
        let (client_write, server_read) = tokio::io::duplex(4096);
        let (_server_write, client_read) = tokio::io::duplex(4096);

        let client = StdioTransport::from_raw(client_read, client_write);

        use tokio::io::AsyncReadExt;
        let mut reader = server_read;

        client
            .send(TransportMessage::new(r#"{"jsonrpc":"2.0","id":1}"#))
            .await
            .unwrap();

        let mut buf = vec![0u8; 64];
        let n = reader.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).ends_with('\n'));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = StdioTransport::new(StdioTransportConfig::default());
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }
}
