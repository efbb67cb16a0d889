//! Audit configuration schema.
//!
//! Consumed from the CLI's config loader. Unknown keys pass through into
//! `extra` maps for forward compatibility; type mismatches fail
//! deserialization with a validation error.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bellwether_core::{AuditError, ErrorCode};
use bellwether_transport::TransportKind;

/// Audit mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// LLM-free: questions synthesized from schemas
    #[default]
    Structural,
    /// LLM-driven exploration
    Explore,
}

/// Target server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    /// Command to spawn for stdio transports
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the spawned command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the spawned command
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Base URL for HTTP transports
    #[serde(default)]
    pub url: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Transport selection
    #[serde(default)]
    pub transport: Option<TransportKind>,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ServerSection {
    /// Per-request timeout with the default applied.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(30))
    }

    /// Effective transport: explicit, else inferred from the fields set.
    pub fn effective_transport(&self) -> TransportKind {
        if let Some(kind) = self.transport {
            return kind;
        }
        if self.command.is_some() {
            TransportKind::Stdio
        } else {
            TransportKind::StreamableHttp
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSection {
    /// Provider id (`openai`, `ollama`, ...)
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override
    #[serde(default, rename = "baseUrl")]
    pub base_url: Option<String>,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Interview tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    /// Persona ids to interview with
    #[serde(default)]
    pub personas: Vec<String>,
    /// Question cap per `(persona, tool)` pair
    #[serde(default = "default_max_questions", rename = "maxQuestionsPerTool")]
    pub max_questions_per_tool: usize,
    /// Run personas in parallel
    #[serde(default, rename = "parallelPersonas")]
    pub parallel_personas: bool,
    /// Skip deliberately-failing questions
    #[serde(default, rename = "skipErrorTests")]
    pub skip_error_tests: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_max_questions() -> usize {
    5
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            personas: Vec::new(),
            max_questions_per_tool: default_max_questions(),
            parallel_personas: false,
            skip_error_tests: false,
            extra: HashMap::new(),
        }
    }
}

/// Scenario file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenariosSection {
    /// Path to the scenario YAML
    #[serde(default)]
    pub path: Option<String>,
    /// Run only scenarios, skipping generated interviews
    #[serde(default)]
    pub only: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowsSection {
    /// Path to the workflow YAML
    #[serde(default)]
    pub path: Option<String>,
    /// Auto-generate workflows from the tool list
    #[serde(default = "default_true")]
    pub discover: bool,
    /// Track state produced by workflow steps
    #[serde(default, rename = "trackState")]
    pub track_state: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowsSection {
    fn default() -> Self {
        Self {
            path: None,
            discover: true,
            track_state: false,
            extra: HashMap::new(),
        }
    }
}

/// Baseline comparison configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineSection {
    /// Prior baseline to diff against
    #[serde(default, rename = "comparePath")]
    pub compare_path: Option<String>,
    /// Exit non-zero when drift severity reaches warning
    #[serde(default, rename = "failOnDrift")]
    pub fail_on_drift: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Response-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Whether the response cache is active
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            extra: HashMap::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level filter
    #[serde(default)]
    pub level: Option<String>,
    /// Verbose output
    #[serde(default)]
    pub verbose: bool,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Agent-readable markdown
    #[serde(rename = "agents.md")]
    AgentsMd,
    /// JSON
    #[serde(rename = "json")]
    #[default]
    Json,
    /// Both
    #[serde(rename = "both")]
    Both,
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSection {
    /// Output directory
    #[serde(default)]
    pub dir: Option<String>,
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Top-level audit configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Audit mode
    #[serde(default)]
    pub mode: AuditMode,
    /// Target server
    #[serde(default)]
    pub server: ServerSection,
    /// LLM provider
    #[serde(default)]
    pub llm: LlmSection,
    /// Interview tuning
    #[serde(default)]
    pub test: TestSection,
    /// Scenario files
    #[serde(default)]
    pub scenarios: ScenariosSection,
    /// Workflow files and discovery
    #[serde(default)]
    pub workflows: WorkflowsSection,
    /// Baseline comparison
    #[serde(default)]
    pub baseline: BaselineSection,
    /// Response cache
    #[serde(default)]
    pub cache: CacheSection,
    /// Logging
    #[serde(default)]
    pub logging: LoggingSection,
    /// Output
    #[serde(default)]
    pub output: OutputSection,
    /// Unknown keys pass through
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl AuditConfig {
    /// Parse from a JSON value, failing with a config validation error.
    pub fn from_value(value: Value) -> Result<Self, AuditError> {
        let config: Self = serde_json::from_value(value).map_err(|e| {
            AuditError::new(ErrorCode::ValidationConfig, format!("invalid config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation.
    pub fn validate(&self) -> Result<(), AuditError> {
        match self.server.effective_transport() {
            TransportKind::Stdio => {
                if self.server.command.as_deref().unwrap_or("").is_empty() {
                    return Err(AuditError::new(
                        ErrorCode::ValidationConfig,
                        "stdio transport requires server.command",
                    ));
                }
            }
            _ => {
                if self.server.url.as_deref().unwrap_or("").is_empty() {
                    return Err(AuditError::new(
                        ErrorCode::ValidationConfig,
                        "http transports require server.url",
                    ));
                }
            }
        }
        Ok(())
    }
}
