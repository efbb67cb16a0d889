//! Declarative YAML scenarios and assertion evaluation.
//!
//! A scenario calls one tool (or renders one prompt) with literal arguments
//! and checks the observed response against a list of assertions, each a
//! dotted path plus a condition.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use bellwether_core::{AuditError, ErrorCode, resolve_path, value_type_name};

use crate::types::ExpectedOutcome;

/// Scenario category; drives the expected outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioCategory {
    /// The call should succeed
    HappyPath,
    /// The call should be rejected
    Error,
    /// Either outcome is acceptable
    EdgeCase,
}

impl ScenarioCategory {
    /// Expected outcome for this category.
    pub fn expected_outcome(self) -> ExpectedOutcome {
        match self {
            Self::HappyPath => ExpectedOutcome::Success,
            Self::Error => ExpectedOutcome::Error,
            Self::EdgeCase => ExpectedOutcome::Either,
        }
    }
}

/// Assertion condition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionCondition {
    /// The path resolves to something (including `null`)
    Exists,
    /// The resolved value equals the expected value
    Equals,
    /// String containment, array membership, or object key presence
    Contains,
    /// The resolved value is truthy
    Truthy,
    /// The resolved value has the named JSON type; `null` is a type
    Type,
    /// The resolved string matches the regex
    Matches,
}

/// One assertion: a dotted path into the response plus a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Dotted path into the observed response
    pub path: String,
    /// Condition applied at the path
    pub condition: AssertionCondition,
    /// Expected value for conditions that take one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A user-supplied scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name
    pub name: String,
    /// Tool to call (exactly one of `tool`/`prompt`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Prompt to render (exactly one of `tool`/`prompt`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Literal arguments
    #[serde(default)]
    pub args: Value,
    /// Assertions over the observed response
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Category driving the expected outcome
    #[serde(default = "default_category")]
    pub category: ScenarioCategory,
}

fn default_category() -> ScenarioCategory {
    ScenarioCategory::HappyPath
}

impl Scenario {
    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), AuditError> {
        match (&self.tool, &self.prompt) {
            (Some(_), Some(_)) => Err(AuditError::new(
                ErrorCode::ValidationScenario,
                format!("scenario '{}' names both a tool and a prompt", self.name),
            )),
            (None, None) => Err(AuditError::new(
                ErrorCode::ValidationScenario,
                format!("scenario '{}' names neither a tool nor a prompt", self.name),
            )),
            _ => {
                if !self.args.is_null() && !self.args.is_object() {
                    return Err(AuditError::new(
                        ErrorCode::ValidationScenario,
                        format!("scenario '{}': args must be an object", self.name),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Result of evaluating one assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    /// The asserted path
    pub path: String,
    /// The condition applied
    pub condition: AssertionCondition,
    /// Whether the assertion held
    pub passed: bool,
    /// The value found at the path, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of running one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Target tool or prompt
    pub target: String,
    /// Whether the expected outcome and all assertions held
    pub passed: bool,
    /// Whether the call outcome matched the category's expectation
    pub expected_outcome_met: bool,
    /// Per-assertion results
    pub assertion_results: Vec<AssertionResult>,
    /// Error text when the call itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluate assertions against an observed response value.
pub fn evaluate_assertions(response: &Value, assertions: &[Assertion]) -> Vec<AssertionResult> {
    assertions
        .iter()
        .map(|assertion| evaluate_one(response, assertion))
        .collect()
}

fn evaluate_one(response: &Value, assertion: &Assertion) -> AssertionResult {
    let resolved = resolve_path(response, &assertion.path);
    let (passed, message) = match assertion.condition {
        AssertionCondition::Exists => (resolved.is_some(), None),
        AssertionCondition::Equals => match (&assertion.value, resolved) {
            (Some(expected), Some(actual)) => (
                actual == expected,
                (actual != expected).then(|| format!("expected {expected}, found {actual}")),
            ),
            (Some(_), None) => (false, Some("path did not resolve".to_string())),
            (None, _) => (false, Some("equals requires a value".to_string())),
        },
        AssertionCondition::Contains => match (&assertion.value, resolved) {
            (Some(needle), Some(actual)) => evaluate_contains(actual, needle),
            (Some(_), None) => (false, Some("path did not resolve".to_string())),
            (None, _) => (false, Some("contains requires a value".to_string())),
        },
        AssertionCondition::Truthy => match resolved {
            Some(value) => (is_truthy(value), None),
            None => (false, Some("path did not resolve".to_string())),
        },
        AssertionCondition::Type => match (&assertion.value, resolved) {
            (Some(Value::String(expected)), Some(actual)) => {
                let actual_type = value_type_name(actual);
                (
                    actual_type == expected,
                    (actual_type != expected)
                        .then(|| format!("expected type {expected}, found {actual_type}")),
                )
            }
            (_, None) => (false, Some("path did not resolve".to_string())),
            _ => (false, Some("type requires a string value".to_string())),
        },
        AssertionCondition::Matches => match (&assertion.value, resolved) {
            (Some(Value::String(pattern)), Some(Value::String(actual))) => {
                match Regex::new(pattern) {
                    Ok(regex) => (
                        regex.is_match(actual),
                        (!regex.is_match(actual))
                            .then(|| format!("'{actual}' does not match /{pattern}/")),
                    ),
                    Err(e) => (false, Some(format!("invalid pattern: {e}"))),
                }
            }
            (Some(Value::String(_)), Some(other)) => (
                false,
                Some(format!("matches requires a string, found {}", value_type_name(other))),
            ),
            (_, None) => (false, Some("path did not resolve".to_string())),
            _ => (false, Some("matches requires a string pattern".to_string())),
        },
    };

    AssertionResult {
        path: assertion.path.clone(),
        condition: assertion.condition,
        passed,
        actual: resolved.cloned(),
        message,
    }
}

fn evaluate_contains(actual: &Value, needle: &Value) -> (bool, Option<String>) {
    let contained = match (actual, needle) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.contains(needle),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    };
    (
        contained,
        (!contained).then(|| format!("{actual} does not contain {needle}")),
    )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parse scenarios from YAML text.
pub fn parse_scenarios(yaml: &str) -> Result<Vec<Scenario>, AuditError> {
    let scenarios: Vec<Scenario> = serde_yaml::from_str(yaml).map_err(|e| {
        AuditError::new(ErrorCode::ValidationScenario, format!("invalid scenario YAML: {e}"))
    })?;
    for scenario in &scenarios {
        scenario.validate()?;
    }
    Ok(scenarios)
}

/// Load scenarios from a YAML file.
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, AuditError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        AuditError::new(
            ErrorCode::ValidationScenario,
            format!("cannot read scenario file {}: {e}", path.display()),
        )
    })?;
    parse_scenarios(&yaml)
}
