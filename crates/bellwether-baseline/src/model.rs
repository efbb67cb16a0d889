//! Baseline file model.
//!
//! The on-disk format is versioned by the producing CLI's semver; two
//! baselines sharing a major version are diff-compatible. The integrity
//! hash is a pure function of the canonicalized content minus volatile
//! timestamps.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bellwether_core::{AuditError, ErrorCode};

use crate::canonical::short_hash;

/// Structural summary of the audited server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFingerprint {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
    /// Negotiated protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Sorted capability names
    pub capabilities: Vec<String>,
}

/// One tool as captured in the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapability {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw input schema, untouched
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Canonical hash of the input schema
    #[serde(rename = "schemaHash")]
    pub schema_hash: String,
    /// Shape hash of observed successful responses
    #[serde(rename = "responseFingerprint", skip_serializing_if = "Option::is_none")]
    pub response_fingerprint: Option<String>,
    /// Output shape inferred from observed responses
    #[serde(rename = "inferredOutputSchema", skip_serializing_if = "Option::is_none")]
    pub inferred_output_schema: Option<Value>,
    /// Normalized error patterns observed during the interview
    #[serde(rename = "errorPatterns", default)]
    pub error_patterns: Vec<String>,
}

/// One prompt as captured in the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptCapability {
    /// Prompt name
    pub name: String,
    /// Prompt description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument names, sorted
    pub arguments: Vec<String>,
}

/// One resource as captured in the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCapability {
    /// Resource name
    pub name: String,
    /// Resource URI
    pub uri: String,
    /// MIME type, if known
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Cloud-assertion kinds derived from tool profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudAssertionKind {
    /// Observed behavior the tool is expected to keep
    Expects,
    /// Input discipline the tool enforces
    Requires,
    /// Security-relevant observations
    Warns,
    /// Informational notes
    Notes,
}

/// One assertion derived from the interview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineAssertion {
    /// Tool the assertion is about
    pub tool: String,
    /// Assertion kind
    pub kind: CloudAssertionKind,
    /// Assertion text
    pub text: String,
}

/// A workflow recorded in the baseline, for impact analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Workflow name
    pub name: String,
    /// Tool sequence, in step order
    pub tools: Vec<String>,
    /// Whether the auto-generator produced it
    #[serde(default)]
    pub discovered: bool,
}

/// A condensed interaction record kept in the baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewRecord {
    /// Tool that was called
    pub tool: String,
    /// Persona that asked
    pub persona: String,
    /// Question intent
    pub question: String,
    /// Question category
    pub category: String,
    /// Whether the call completed without failure
    pub ok: bool,
    /// Call latency in milliseconds
    #[serde(rename = "latencyMs")]
    pub latency_ms: u64,
}

/// Baseline metadata. `generated_at` and `duration_ms` are volatile and
/// excluded from the integrity hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMetadata {
    /// Audit mode (`check` or `explore`)
    pub mode: String,
    /// When the baseline was generated
    #[serde(rename = "generatedAt")]
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Producing CLI version
    #[serde(rename = "cliVersion")]
    pub cli_version: String,
    /// Command line of the audited server, if spawned
    #[serde(rename = "serverCommand", skip_serializing_if = "Option::is_none")]
    pub server_command: Option<String>,
    /// Server name
    #[serde(rename = "serverName")]
    pub server_name: String,
    /// Interview duration in milliseconds
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// Personas that ran
    pub personas: Vec<String>,
    /// Model used for generation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Capability sets captured by the baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineCapabilities {
    /// Tools, in discovery order
    pub tools: Vec<ToolCapability>,
    /// Prompts, in discovery order
    #[serde(default)]
    pub prompts: Vec<PromptCapability>,
    /// Resources, in discovery order
    #[serde(default)]
    pub resources: Vec<ResourceCapability>,
}

/// A sealed baseline. Immutable once the hash is computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    /// Format version (producing CLI semver)
    pub version: String,
    /// Metadata, including volatile fields
    pub metadata: BaselineMetadata,
    /// Server fingerprint
    pub server: ServerFingerprint,
    /// Captured capabilities
    pub capabilities: BaselineCapabilities,
    /// Condensed interview records
    #[serde(default)]
    pub interviews: Vec<InterviewRecord>,
    /// Per-tool behavioral profiles from the interview
    #[serde(rename = "toolProfiles", default)]
    pub tool_profiles: Vec<bellwether_interview::ToolProfile>,
    /// Derived assertions
    #[serde(default)]
    pub assertions: Vec<BaselineAssertion>,
    /// Recorded workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows: Option<Vec<WorkflowRecord>>,
    /// Interview summary
    pub summary: String,
    /// Integrity hash (first 16 hex chars of SHA-256 over the canonical
    /// content sans volatile timestamps)
    pub hash: String,
}

impl Baseline {
    /// Compute the integrity hash over the canonical content.
    ///
    /// The hash covers the structurally stable content: format version,
    /// server fingerprint, and declared capabilities. Volatile fields
    /// (timestamps, latencies) and interview-derived observations (which
    /// vary run to run under LLM generation) stay out, so the same
    /// discovery always produces the same hash.
    pub fn compute_hash(&self) -> String {
        let tools: Vec<Value> = self
            .capabilities
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                    "schemaHash": tool.schema_hash,
                })
            })
            .collect();
        let hashed = serde_json::json!({
            "version": self.version,
            "server": self.server,
            "capabilities": {
                "tools": tools,
                "prompts": self.capabilities.prompts,
                "resources": self.capabilities.resources,
            },
        });
        short_hash(&hashed)
    }

    /// Seal the baseline by filling in its hash.
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }

    /// Verify the stored hash against the content.
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Major version of the producing CLI, for diff compatibility.
    pub fn major_version(&self) -> Option<u64> {
        self.version.split('.').next()?.parse().ok()
    }

    /// Whether two baselines can be meaningfully diffed.
    pub fn diff_compatible(&self, other: &Self) -> bool {
        match (self.major_version(), other.major_version()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Save as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), AuditError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AuditError::internal(format!("baseline serialization: {e}")))?;
        std::fs::write(path, json).map_err(|e| {
            AuditError::internal(format!("cannot write baseline {}: {e}", path.display()))
        })
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AuditError::new(
                ErrorCode::ValidationConfig,
                format!("cannot read baseline {}: {e}", path.display()),
            )
        })?;
        serde_json::from_str(&json).map_err(|e| {
            AuditError::new(
                ErrorCode::ValidationConfig,
                format!("malformed baseline {}: {e}", path.display()),
            )
        })
    }
}
