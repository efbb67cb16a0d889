//! Interview record types.

use serde::{Deserialize, Serialize};

use bellwether_core::AuditError;
use bellwether_protocol::CallToolResult;

use crate::question::QuestionCategory;
use crate::scenario::ScenarioResult;
use crate::workflow::WorkflowResult;

/// What a question expects the tool call to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    /// The call should succeed
    Success,
    /// The call should be rejected or fail
    Error,
    /// Either outcome is acceptable
    Either,
}

/// One question asked of one tool: the call, its outcome, and the
/// assessment. Exactly one of `response` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Tool that was called
    pub tool_name: String,
    /// Persona that generated the question
    pub persona: String,
    /// The question's intent, in prose
    pub question: String,
    /// Question category
    pub category: QuestionCategory,
    /// Arguments the tool was called with
    pub args: serde_json::Value,
    /// The tool's response, when the call went through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CallToolResult>,
    /// The failure, when the call did not go through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
    /// Wall-clock latency of the call in milliseconds
    pub latency_ms: u64,
    /// What the question expected to happen
    pub expected_outcome: ExpectedOutcome,
    /// Whether the observed outcome matched the question's intent;
    /// `None` when no assessment ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_correct: Option<bool>,
    /// Whether the interaction was served from the response cache
    #[serde(default)]
    pub from_cache: bool,
}

impl Interaction {
    /// Whether the tool itself reported or produced a failure.
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.response.as_ref().is_some_and(CallToolResult::is_error)
    }
}

/// Behavioral summary of one tool, derived solely from its interactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProfile {
    /// Tool name
    pub name: String,
    /// Observed behavior worth recording
    pub behavioral_notes: Vec<String>,
    /// Limitations surfaced during the interview
    pub limitations: Vec<String>,
    /// Security-relevant observations
    pub security_notes: Vec<String>,
    /// Confidence in the profile, counting only success-expected samples
    pub confidence: f64,
    /// Number of interactions backing the profile
    pub interaction_count: usize,
}

impl ToolProfile {
    /// Compute confidence from interactions: the fraction of
    /// success-expected calls whose outcome matched. `Either`-tagged
    /// samples are excluded.
    pub fn confidence_from(interactions: &[Interaction]) -> f64 {
        let success_tagged: Vec<&Interaction> = interactions
            .iter()
            .filter(|i| i.expected_outcome == ExpectedOutcome::Success)
            .collect();
        if success_tagged.is_empty() {
            return 0.0;
        }
        let correct = success_tagged
            .iter()
            .filter(|i| i.outcome_correct == Some(true))
            .count();
        correct as f64 / success_tagged.len() as f64
    }
}

/// Result of rendering one discovered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptCheck {
    /// Prompt name
    pub name: String,
    /// Whether `prompts/get` succeeded
    pub ok: bool,
    /// Error text when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of messages the prompt rendered to
    pub message_count: usize,
}

/// Result of reading one discovered resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCheck {
    /// Resource URI
    pub uri: String,
    /// Whether `resources/read` succeeded
    pub ok: bool,
    /// Error text when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Interview phases surfaced through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewPhase {
    /// Interview is being set up
    Starting,
    /// Per-tool question fanout
    Interviewing,
    /// Prompt rendering checks
    Prompts,
    /// Resource read checks
    Resources,
    /// Scenario and workflow execution
    Workflows,
    /// Profile synthesis
    Synthesizing,
    /// Interview finished
    Complete,
}

/// Everything an interview produced. Owns the tool profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewResult {
    /// All interactions, in completion order
    pub interactions: Vec<Interaction>,
    /// Per-tool profiles
    pub tool_profiles: Vec<ToolProfile>,
    /// Prompt checks
    pub prompt_checks: Vec<PromptCheck>,
    /// Resource checks
    pub resource_checks: Vec<ResourceCheck>,
    /// User-supplied scenario results, in declaration order
    pub scenario_results: Vec<ScenarioResult>,
    /// Workflow results, in declaration order
    pub workflow_results: Vec<WorkflowResult>,
    /// Overall interview summary
    pub summary: String,
    /// Personas that ran
    pub personas: Vec<String>,
    /// True when the interview was cancelled; partial results are valid
    pub cancelled: bool,
    /// When the interview started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When the interview finished
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn interaction(expected: ExpectedOutcome, correct: Option<bool>) -> Interaction {
        Interaction {
            tool_name: "t".into(),
            persona: "p".into(),
            question: "q".into(),
            category: QuestionCategory::HappyPath,
            args: serde_json::json!({}),
            response: None,
            error: None,
            latency_ms: 1,
            expected_outcome: expected,
            outcome_correct: correct,
            from_cache: false,
        }
    }

    #[test]
    fn test_confidence_counts_only_success_tagged() {
        let interactions = vec![
            interaction(ExpectedOutcome::Success, Some(true)),
            interaction(ExpectedOutcome::Success, Some(false)),
            // Excluded from the denominator entirely
            interaction(ExpectedOutcome::Either, Some(true)),
            interaction(ExpectedOutcome::Error, Some(true)),
        ];
        assert_eq!(ToolProfile::confidence_from(&interactions), 0.5);
    }

    #[test]
    fn test_confidence_empty_is_zero() {
        assert_eq!(ToolProfile::confidence_from(&[]), 0.0);
        let only_error = vec![interaction(ExpectedOutcome::Error, Some(true))];
        assert_eq!(ToolProfile::confidence_from(&only_error), 0.0);
    }

    #[test]
    fn test_failed_flag() {
        let mut i = interaction(ExpectedOutcome::Success, None);
        assert!(!i.failed());

        i.response = Some(CallToolResult {
            content: vec![],
            is_error: Some(true),
            structured_content: None,
        });
        assert!(i.failed());

        i.response = None;
        i.error = Some(AuditError::internal("boom"));
        assert!(i.failed());
    }
}
