//! Process exit-code mapping.

use bellwether_baseline::DiffSeverity;
use bellwether_core::{AuditError, ErrorCode};

/// Exit statuses the CLI maps to process codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Audit completed, no actionable drift
    Success,
    /// Drift at warning severity or above with `failOnDrift` set
    Drift,
    /// Configuration or validation error
    ConfigError,
    /// Could not connect to the server
    ConnectionFailure,
    /// Authentication failure
    AuthFailure,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Drift => 1,
            Self::ConfigError => 2,
            Self::ConnectionFailure => 3,
            Self::AuthFailure => 4,
        }
    }

    /// Map a fatal error to its exit status.
    pub fn from_error(error: &AuditError) -> Self {
        match error.code {
            ErrorCode::ValidationConfig
            | ErrorCode::ValidationScenario
            | ErrorCode::ValidationWorkflow => Self::ConfigError,
            ErrorCode::TransportAuthFailed | ErrorCode::LlmAuth => Self::AuthFailure,
            ErrorCode::TransportConnectionRefused
            | ErrorCode::TransportServerExit
            | ErrorCode::TransportTimeout => Self::ConnectionFailure,
            _ => Self::ConfigError,
        }
    }

    /// Map a diff severity under a `failOnDrift` policy.
    pub fn from_drift(severity: DiffSeverity, fail_on_drift: bool) -> Self {
        if fail_on_drift && severity >= DiffSeverity::Warning {
            Self::Drift
        } else {
            Self::Success
        }
    }
}

/// Remediation hint for a fatal error: what to set, what to check, and
/// whether retrying is worthwhile.
pub fn remediation_hint(error: &AuditError) -> String {
    let advice = match error.code {
        ErrorCode::TransportAuthFailed => {
            "check the server's auth token (server.headers / --auth-token); \
             the response's WWW-Authenticate challenge is in the error metadata"
        }
        ErrorCode::LlmAuth => {
            "set the provider API key (OPENAI_API_KEY or the configured \
             provider's env var) or switch llm.provider"
        }
        ErrorCode::TransportConnectionRefused => {
            "verify server.command / server.url and that the server is \
             running; safe to retry"
        }
        ErrorCode::TransportServerExit => {
            "the server process crashed; its stderr tail is in the error \
             message - check server.command and server.args"
        }
        ErrorCode::TransportTimeout => {
            "increase server.timeout or check server responsiveness; safe \
             to retry"
        }
        ErrorCode::LlmQuota => "provider quota exhausted; top up billing or switch llm.provider",
        ErrorCode::ValidationConfig => "fix the configuration key named in the message",
        ErrorCode::ValidationScenario => "fix the scenario file named in the message",
        ErrorCode::ValidationWorkflow => "fix the workflow file named in the message",
        _ if error.is_retryable() => "transient failure; safe to retry",
        _ => "not retryable; see the error message for the failing component",
    };
    format!("{error}\n  hint: {advice}")
}
