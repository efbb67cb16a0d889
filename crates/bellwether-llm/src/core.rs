//! Core LLM abstractions: the provider trait, message and option types,
//! and the closed error taxonomy every driver maps its native failures into.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bellwether_core::{AuditError, ErrorCode};

/// Errors that can occur during LLM operations.
///
/// Drivers translate provider-native error shapes into this taxonomy and
/// never leak provider vocabulary past the interface.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Provider rejected the API credentials
    #[error("Authentication failed: {message}")]
    Auth {
        /// Detail from the provider
        message: String,
    },

    /// Rate limited; the provider may suggest a delay
    #[error("Rate limited: {message}")]
    RateLimit {
        /// Detail from the provider
        message: String,
        /// Server-suggested delay before retrying
        retry_after_ms: Option<u64>,
    },

    /// Billing or usage quota exhausted
    #[error("Quota exhausted: {message}")]
    Quota {
        /// Detail from the provider
        message: String,
    },

    /// Connection-level failure reaching the provider
    #[error("Connection error: {message}")]
    Connection {
        /// Detail from the underlying client
        message: String,
    },

    /// Provider returned a 5xx
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status
        status: u16,
        /// Response detail
        message: String,
    },

    /// The model declined to answer
    #[error("Model refused: {message}")]
    Refusal {
        /// Refusal text or filter category
        message: String,
    },

    /// Provider output could not be parsed as requested
    #[error("Parse error: {message}")]
    Parse {
        /// What failed to parse
        message: String,
    },

    /// The request itself was invalid
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Validation detail
        message: String,
    },

    /// Requested model is not available on this provider
    #[error("Model '{model}' not available")]
    ModelUnavailable {
        /// The missing model
        model: String,
    },

    /// The request timed out
    #[error("Request timed out after {seconds}s")]
    Timeout {
        /// Elapsed seconds
        seconds: u64,
    },

    /// A circuit breaker rejected the call without trying
    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen {
        /// Breaker name
        breaker: String,
    },

    /// The operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Retry attempts exhausted; wraps the final error
    #[error("Gave up after {attempts} attempts over {elapsed_ms}ms: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Total elapsed milliseconds
        elapsed_ms: u64,
        /// The last error observed
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// Whether a retry loop may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::RateLimit { .. }
            | Self::ServerError { .. }
            | Self::Connection { .. }
            | Self::ModelUnavailable { .. }
            | Self::CircuitOpen { .. } => true,
            Self::Exhausted { .. }
            | Self::Auth { .. }
            | Self::Quota { .. }
            | Self::InvalidRequest { .. }
            | Self::Refusal { .. }
            | Self::Parse { .. }
            | Self::Cancelled => false,
        }
    }

    /// Whether the fallback chain should try the next provider.
    pub fn is_failover_worthy(&self) -> bool {
        match self {
            Self::Auth { .. }
            | Self::Quota { .. }
            | Self::Connection { .. }
            | Self::RateLimit { .. }
            | Self::ServerError { .. }
            | Self::Timeout { .. }
            | Self::CircuitOpen { .. }
            | Self::ModelUnavailable { .. } => true,
            Self::Exhausted { last, .. } => last.is_failover_worthy(),
            Self::Refusal { .. }
            | Self::Parse { .. }
            | Self::InvalidRequest { .. }
            | Self::Cancelled => false,
        }
    }

    /// Server-suggested retry delay, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after_ms, .. } => *retry_after_ms,
            Self::Exhausted { last, .. } => last.retry_after_ms(),
            _ => None,
        }
    }
}

impl From<LlmError> for AuditError {
    fn from(err: LlmError) -> Self {
        let code = match &err {
            LlmError::Auth { .. } => ErrorCode::LlmAuth,
            LlmError::RateLimit { .. } => ErrorCode::LlmRateLimit,
            LlmError::Quota { .. } => ErrorCode::LlmQuota,
            LlmError::Connection { .. }
            | LlmError::ServerError { .. }
            | LlmError::Timeout { .. }
            | LlmError::ModelUnavailable { .. } => ErrorCode::LlmConnection,
            LlmError::Refusal { .. } => ErrorCode::LlmRefusal,
            LlmError::Parse { .. } | LlmError::InvalidRequest { .. } => ErrorCode::LlmParse,
            LlmError::CircuitOpen { .. } => ErrorCode::CircuitBreakerOpen,
            LlmError::Cancelled => ErrorCode::Cancelled,
            LlmError::Exhausted { last, .. } => {
                return AuditError::from((**last).clone()).with_metadata(
                    "retries_exhausted",
                    serde_json::Value::Bool(true),
                );
            }
        };
        let mut audit = AuditError::new(code, err.to_string()).with_component("llm");
        if let Some(ms) = err.retry_after_ms() {
            audit = audit.with_metadata("retry_after_ms", serde_json::json!(ms));
        }
        if let LlmError::CircuitOpen { breaker } = &err {
            audit = audit.with_metadata("breaker", serde_json::json!(breaker));
        }
        audit
    }
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
}

/// A message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: MessageRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Requested response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Free-form text
    #[default]
    Text,
    /// JSON object output
    Json,
}

/// Options carried by every completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Model override; the provider's default is used when absent
    pub model: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Requested response format
    pub response_format: ResponseFormat,
    /// System prompt prepended to the conversation
    pub system_prompt: Option<String>,
    /// Cancellation signal observed at the next I/O boundary
    pub cancel: CancellationToken,
}

impl CompletionOptions {
    /// Options requesting JSON output.
    pub fn json() -> Self {
        Self {
            response_format: ResponseFormat::Json,
            ..Default::default()
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Token usage for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens
    pub input_tokens: u64,
    /// Output/completion tokens
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create a usage record.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Usage report delivered to the budget callback.
#[derive(Debug, Clone)]
pub struct UsageReport {
    /// Provider that served the call
    pub provider: String,
    /// Model that served the call
    pub model: String,
    /// Tokens consumed
    pub usage: TokenUsage,
}

/// Callback invoked with the usage of every completed call.
pub type UsageCallback = Arc<dyn Fn(&UsageReport) + Send + Sync>;

/// Outcome of a chat or completion call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Generated text
    pub text: String,
    /// Model that produced it
    pub model: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Provider stop reason, if reported
    pub stop_reason: Option<String>,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text
    Delta(String),
    /// Stream completed with the final outcome
    Done(ChatOutcome),
    /// Stream failed
    Error(LlmError),
}

/// Static description of a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Stable identifier (e.g. "openai", "ollama")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Whether the provider honors JSON response format
    pub supports_json: bool,
    /// Whether `stream` is implemented
    pub supports_streaming: bool,
    /// Model used when options carry none
    pub default_model: String,
}

/// Uniform capability surface over LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync + fmt::Debug {
    /// Static provider description.
    fn info(&self) -> ProviderInfo;

    /// Run a chat conversation to completion.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<ChatOutcome>;

    /// Complete a bare prompt. Defaults to a single-user-message chat.
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> LlmResult<ChatOutcome> {
        self.chat(&[ChatMessage::user(prompt)], options).await
    }

    /// Stream a response as chunks followed by a completion event.
    ///
    /// Optional; providers that do not stream return `InvalidRequest`.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<mpsc::Receiver<StreamEvent>> {
        let _ = (messages, options);
        Err(LlmError::InvalidRequest {
            message: format!("provider '{}' does not support streaming", self.info().id),
        })
    }
}
