//! Unified error taxonomy with rich context preservation.
//!
//! Every internal failure carries a code, a severity, a retryability tag,
//! and a context record identifying the component and operation that
//! produced it. Domain crates define their own `thiserror` enums and
//! convert into [`AuditError`] at their boundaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Result type alias for Bellwether operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ========================================================================
    // Transport errors
    // ========================================================================
    /// Remote endpoint refused the connection
    TransportConnectionRefused,
    /// Transport-level authentication failed (401/403 on preflight or POST)
    TransportAuthFailed,
    /// Child server process exited unexpectedly
    TransportServerExit,
    /// Peer sent bytes that violate the framing or JSON contract
    TransportProtocolViolation,
    /// Transport I/O did not complete within its deadline
    TransportTimeout,

    // ========================================================================
    // LLM provider errors
    // ========================================================================
    /// Provider rejected the API credentials
    LlmAuth,
    /// Provider rate limit hit; context may carry `retry_after_ms`
    LlmRateLimit,
    /// Billing or usage quota exhausted
    LlmQuota,
    /// Connection-level failure talking to the provider
    LlmConnection,
    /// Model declined to answer (content filter / refusal)
    LlmRefusal,
    /// Provider returned text that could not be parsed as expected
    LlmParse,

    // ========================================================================
    // MCP protocol errors
    // ========================================================================
    /// Protocol method invoked before `initialize` completed
    ProtocolNotInitialized,
    /// Server response failed to deserialize into the expected shape
    ProtocolInvalidResponse,
    /// Server reported the method as unknown
    ProtocolUnknownMethod,

    // ========================================================================
    // Validation errors
    // ========================================================================
    /// Configuration failed validation
    ValidationConfig,
    /// Scenario definition failed validation
    ValidationScenario,
    /// Workflow definition failed validation
    ValidationWorkflow,

    // ========================================================================
    // Control flow
    // ========================================================================
    /// A named circuit breaker is open; metadata identifies the breaker
    CircuitBreakerOpen,
    /// Operation was cancelled cooperatively
    Cancelled,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// Default severity for this code
    pub fn severity(self) -> Severity {
        match self {
            Self::TransportAuthFailed | Self::TransportServerExit | Self::LlmAuth => {
                Severity::Critical
            }
            Self::TransportConnectionRefused
            | Self::TransportProtocolViolation
            | Self::LlmQuota
            | Self::ProtocolInvalidResponse
            | Self::Internal => Severity::High,
            Self::TransportTimeout
            | Self::LlmRateLimit
            | Self::LlmConnection
            | Self::LlmRefusal
            | Self::ProtocolNotInitialized
            | Self::ValidationConfig
            | Self::ValidationScenario
            | Self::ValidationWorkflow => Severity::Medium,
            Self::LlmParse
            | Self::ProtocolUnknownMethod
            | Self::CircuitBreakerOpen
            | Self::Cancelled => Severity::Low,
        }
    }

    /// Default retryability for this code
    pub fn retryability(self) -> Retryability {
        match self {
            Self::TransportTimeout
            | Self::TransportConnectionRefused
            | Self::LlmRateLimit
            | Self::LlmConnection => Retryability::Retryable,
            Self::CircuitBreakerOpen => Retryability::CircuitBreak,
            _ => Retryability::Terminal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransportConnectionRefused => "TRANSPORT_CONNECTION_REFUSED",
            Self::TransportAuthFailed => "TRANSPORT_AUTH_FAILED",
            Self::TransportServerExit => "TRANSPORT_SERVER_EXIT",
            Self::TransportProtocolViolation => "TRANSPORT_PROTOCOL_VIOLATION",
            Self::TransportTimeout => "TRANSPORT_TIMEOUT",
            Self::LlmAuth => "LLM_AUTH",
            Self::LlmRateLimit => "LLM_RATE_LIMIT",
            Self::LlmQuota => "LLM_QUOTA",
            Self::LlmConnection => "LLM_CONNECTION",
            Self::LlmRefusal => "LLM_REFUSAL",
            Self::LlmParse => "LLM_PARSE",
            Self::ProtocolNotInitialized => "PROTOCOL_NOT_INITIALIZED",
            Self::ProtocolInvalidResponse => "PROTOCOL_INVALID_RESPONSE",
            Self::ProtocolUnknownMethod => "PROTOCOL_UNKNOWN_METHOD",
            Self::ValidationConfig => "VALIDATION_CONFIG",
            Self::ValidationScenario => "VALIDATION_SCENARIO",
            Self::ValidationWorkflow => "VALIDATION_WORKFLOW",
            Self::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

/// How bad the failure is for the overall audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recoverable nuisance
    Low,
    /// Degrades a single interaction
    Medium,
    /// Degrades a whole tool or provider
    High,
    /// Aborts the audit
    Critical,
}

/// Whether the operation that failed may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retryability {
    /// Retry with backoff may succeed
    Retryable,
    /// Retrying is pointless; propagate immediately
    Terminal,
    /// A circuit breaker rejected the call; retry after its reset window
    CircuitBreak,
}

/// Contextual information attached to every error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Component where the error occurred (e.g. "transport.stdio")
    pub component: Option<String>,

    /// Operation that was being performed (e.g. "tools/call")
    pub operation: Option<String>,

    /// Additional metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Timestamp when the error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Retry information, present when a retry loop produced this error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryInfo>,
}

/// Information about retry attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryInfo {
    /// Number of attempts made
    pub attempts: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    /// Total time spent across attempts, in milliseconds
    pub elapsed_ms: u64,

    /// Server-suggested delay before the next attempt, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// Unified error type carrying the full taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditError {
    /// Unique identifier for this error instance
    pub id: Uuid,

    /// Error classification
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Severity of the failure
    pub severity: Severity,

    /// Whether the failed operation may be retried
    pub retryability: Retryability,

    /// Contextual information
    pub context: ErrorContext,
}

impl AuditError {
    /// Create a new error; severity and retryability default from the code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            message: message.into(),
            severity: code.severity(),
            retryability: code.retryability(),
            context: ErrorContext {
                timestamp: chrono::Utc::now(),
                ..Default::default()
            },
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attach the originating component
    #[must_use]
    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.context.component = Some(component.into());
        self
    }

    /// Attach the operation that was in flight
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Attach a metadata key/value pair
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.metadata.insert(key.into(), value);
        self
    }

    /// Attach retry accounting
    #[must_use]
    pub fn with_retry(mut self, retry: RetryInfo) -> Self {
        self.context.retry = Some(retry);
        self
    }

    /// Override the default retryability
    #[must_use]
    pub fn with_retryability(mut self, retryability: Retryability) -> Self {
        self.retryability = retryability;
        self
    }

    /// Server-suggested delay before retrying, if any
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.context
            .retry
            .as_ref()
            .and_then(|r| r.retry_after_ms)
            .or_else(|| {
                self.context
                    .metadata
                    .get("retry_after_ms")
                    .and_then(serde_json::Value::as_u64)
            })
    }

    /// True when a retry loop may attempt this operation again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.retryability,
            Retryability::Retryable | Retryability::CircuitBreak
        )
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(component) = &self.context.component {
            write!(f, " (component: {component})")?;
        }
        if let Some(operation) = &self.context.operation {
            write!(f, " (operation: {operation})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AuditError {}
