//! Multi-step workflows with data flow between steps.
//!
//! Each step calls one tool with literal args plus `arg_mapping` entries of
//! the form `$steps[i].result.<path>` that read from earlier step outputs.
//! Execution is sequential; a non-optional failure halts the workflow and
//! records the failing step index.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bellwether_core::{AuditError, ErrorCode, resolve_path};
use bellwether_protocol::CallToolResult;

use crate::scenario::{Assertion, AssertionResult, evaluate_assertions};
use crate::scheduler::ToolInvoker;

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Tool to call
    pub tool: String,
    /// Literal arguments
    #[serde(default)]
    pub args: Value,
    /// Parameters bound from earlier step outputs
    /// (`param -> "$steps[i].result.<path>"`)
    #[serde(default)]
    pub arg_mapping: BTreeMap<String, String>,
    /// When true, a failure records but does not halt the workflow
    #[serde(default)]
    pub optional: bool,
    /// Assertions over this step's wrapped output
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

/// A workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,
    /// Ordered steps
    pub steps: Vec<WorkflowStep>,
    /// True when the auto-generator produced this workflow
    #[serde(default)]
    pub discovered: bool,
}

impl WorkflowDefinition {
    /// Validate structural invariants: non-empty, well-formed references,
    /// and step indices that only point backwards.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.steps.is_empty() {
            return Err(AuditError::new(
                ErrorCode::ValidationWorkflow,
                format!("workflow '{}' has no steps", self.name),
            ));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if !step.args.is_null() && !step.args.is_object() {
                return Err(AuditError::new(
                    ErrorCode::ValidationWorkflow,
                    format!("workflow '{}' step {index}: args must be an object", self.name),
                ));
            }
            for (param, reference) in &step.arg_mapping {
                let Some((from, _path)) = parse_step_reference(reference) else {
                    return Err(AuditError::new(
                        ErrorCode::ValidationWorkflow,
                        format!(
                            "workflow '{}' step {index}: malformed reference '{reference}' \
                             for parameter '{param}'",
                            self.name
                        ),
                    ));
                };
                if from >= index {
                    return Err(AuditError::new(
                        ErrorCode::ValidationWorkflow,
                        format!(
                            "workflow '{}' step {index}: reference '{reference}' does not \
                             point to an earlier step",
                            self.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Parse `$steps[i].result.<path>` into `(i, "result.<path>")`.
pub fn parse_step_reference(reference: &str) -> Option<(usize, String)> {
    let rest = reference.strip_prefix("$steps[")?;
    let close = rest.find(']')?;
    let index: usize = rest[..close].parse().ok()?;
    let path = rest[close + 1..].strip_prefix('.')?;
    if path.is_empty() {
        return None;
    }
    Some((index, path.to_string()))
}

/// An edge of the data-flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowEdge {
    /// Producing step index
    pub from_step: usize,
    /// Consuming step index
    pub to_step: usize,
    /// Parameter the value flows into
    pub param: String,
    /// Path read from the producing step's output
    pub source_path: String,
}

/// Result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Tool that was called
    pub tool: String,
    /// Arguments after mapping resolution
    pub resolved_args: Value,
    /// Wrapped output (`{"result": ...}`) when the call went through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure detail when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the step passed (call succeeded and assertions held)
    pub passed: bool,
    /// Per-assertion results
    pub assertion_results: Vec<AssertionResult>,
    /// Call latency in milliseconds
    pub latency_ms: u64,
}

/// Result of one executed workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow name
    pub name: String,
    /// Whether the auto-generator produced the workflow
    pub discovered: bool,
    /// Per-step results, in execution order
    pub step_results: Vec<StepResult>,
    /// Index of the non-optional step that halted the workflow, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step_index: Option<usize>,
    /// Data-flow edges resolved during execution
    pub data_flow: Vec<DataFlowEdge>,
    /// True when every step ran
    pub completed: bool,
    /// True when execution stopped on cancellation
    pub cancelled: bool,
}

/// Pull a JSON value out of a tool response for downstream steps.
///
/// Prefers structured content; otherwise tries to parse the first text
/// block as JSON, falling back to the raw text.
fn extract_response_value(result: &CallToolResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    let text = result.text();
    if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
        return parsed;
    }
    Value::String(text)
}

/// Execute a workflow sequentially against the invoker.
pub async fn execute_workflow(
    invoker: &dyn ToolInvoker,
    workflow: &WorkflowDefinition,
    cancel: &CancellationToken,
) -> WorkflowResult {
    let mut result = WorkflowResult {
        name: workflow.name.clone(),
        discovered: workflow.discovered,
        step_results: Vec::new(),
        failed_step_index: None,
        data_flow: Vec::new(),
        completed: false,
        cancelled: false,
    };
    // Wrapped outputs of completed steps, indexed by step
    let mut outputs: Vec<Value> = Vec::new();

    for (index, step) in workflow.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            result.cancelled = true;
            return result;
        }

        // Resolve literal args plus mapped bindings
        let mut args = step
            .args
            .as_object()
            .cloned()
            .unwrap_or_default();
        let mut resolution_error: Option<String> = None;
        for (param, reference) in &step.arg_mapping {
            let Some((from, path)) = parse_step_reference(reference) else {
                resolution_error = Some(format!("malformed reference '{reference}'"));
                break;
            };
            let Some(source) = outputs.get(from) else {
                resolution_error = Some(format!("step {from} produced no output"));
                break;
            };
            let Some(value) = resolve_path(source, &path) else {
                resolution_error =
                    Some(format!("path '{path}' not found in step {from} output"));
                break;
            };
            args.insert(param.clone(), value.clone());
            result.data_flow.push(DataFlowEdge {
                from_step: from,
                to_step: index,
                param: param.clone(),
                source_path: path,
            });
        }

        if let Some(error) = resolution_error {
            warn!("workflow '{}' step {index}: {error}", workflow.name);
            result.step_results.push(StepResult {
                tool: step.tool.clone(),
                resolved_args: Value::Object(args),
                output: None,
                error: Some(error),
                passed: false,
                assertion_results: Vec::new(),
                latency_ms: 0,
            });
            outputs.push(Value::Null);
            if !step.optional {
                result.failed_step_index = Some(index);
                return result;
            }
            continue;
        }

        let started = Instant::now();
        let call = invoker
            .call_tool(&step.tool, Some(args.clone()), cancel)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match call {
            Ok(response) => {
                let wrapped = json!({ "result": extract_response_value(&response) });
                let assertion_results = evaluate_assertions(&wrapped, &step.assertions);
                let tool_failed = response.is_error();
                let assertions_passed = assertion_results.iter().all(|r| r.passed);
                let passed = !tool_failed && assertions_passed;

                result.step_results.push(StepResult {
                    tool: step.tool.clone(),
                    resolved_args: Value::Object(args),
                    output: Some(wrapped.clone()),
                    error: tool_failed.then(|| response.text()),
                    passed,
                    assertion_results,
                    latency_ms,
                });
                outputs.push(wrapped);

                if !passed && !step.optional {
                    result.failed_step_index = Some(index);
                    return result;
                }
            }
            Err(error) => {
                debug!(
                    "workflow '{}' step {index} ({}) failed: {error}",
                    workflow.name, step.tool
                );
                let cancelled = error.code == ErrorCode::Cancelled;
                result.step_results.push(StepResult {
                    tool: step.tool.clone(),
                    resolved_args: Value::Object(args),
                    output: None,
                    error: Some(error.to_string()),
                    passed: false,
                    assertion_results: Vec::new(),
                    latency_ms,
                });
                outputs.push(Value::Null);
                if cancelled {
                    result.cancelled = true;
                    return result;
                }
                if !step.optional {
                    result.failed_step_index = Some(index);
                    return result;
                }
            }
        }
    }

    result.completed = true;
    result
}

/// Parse workflows from YAML text.
pub fn parse_workflows(yaml: &str) -> Result<Vec<WorkflowDefinition>, AuditError> {
    let workflows: Vec<WorkflowDefinition> = serde_yaml::from_str(yaml).map_err(|e| {
        AuditError::new(ErrorCode::ValidationWorkflow, format!("invalid workflow YAML: {e}"))
    })?;
    for workflow in &workflows {
        workflow.validate()?;
    }
    Ok(workflows)
}

/// Load workflows from a YAML file.
pub fn load_workflows(path: &Path) -> Result<Vec<WorkflowDefinition>, AuditError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        AuditError::new(
            ErrorCode::ValidationWorkflow,
            format!("cannot read workflow file {}: {e}", path.display()),
        )
    })?;
    parse_workflows(&yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::ScriptedInvoker;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_step_reference() {
        assert_eq!(
            parse_step_reference("$steps[0].result.id"),
            Some((0, "result.id".to_string()))
        );
        assert_eq!(
            parse_step_reference("$steps[12].result.items.0.name"),
            Some((12, "result.items.0.name".to_string()))
        );
        assert_eq!(parse_step_reference("$steps[x].result.id"), None);
        assert_eq!(parse_step_reference("$steps[0]"), None);
        assert_eq!(parse_step_reference("steps[0].result.id"), None);
        assert_eq!(parse_step_reference("$steps[0]."), None);
    }

    #[test]
    fn test_validation_rejects_forward_references() {
        let workflow = WorkflowDefinition {
            name: "bad".into(),
            steps: vec![WorkflowStep {
                tool: "get_user".into(),
                args: json!({}),
                arg_mapping: BTreeMap::from([(
                    "user_id".to_string(),
                    "$steps[0].result.id".to_string(),
                )]),
                optional: false,
                assertions: vec![],
            }],
            discovered: false,
        };
        let err = workflow.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationWorkflow);
    }

    #[test]
    fn test_validation_rejects_empty() {
        let workflow = WorkflowDefinition {
            name: "empty".into(),
            steps: vec![],
            discovered: false,
        };
        assert!(workflow.validate().is_err());
    }

    #[tokio::test]
    async fn test_arg_mapping_flows_between_steps() {
        // S5: create_user returns {"id": "123"}; update_user binds user_id.
        let invoker = ScriptedInvoker::new()
            .with_response("create_user", json!({"id": "123"}))
            .with_response("update_user", json!({"updated": true}));

        let workflow = WorkflowDefinition {
            name: "create-then-update".into(),
            steps: vec![
                WorkflowStep {
                    tool: "create_user".into(),
                    args: json!({"name": "a"}),
                    arg_mapping: BTreeMap::new(),
                    optional: false,
                    assertions: vec![],
                },
                WorkflowStep {
                    tool: "update_user".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::from([(
                        "user_id".to_string(),
                        "$steps[0].result.id".to_string(),
                    )]),
                    optional: false,
                    assertions: vec![],
                },
            ],
            discovered: false,
        };
        workflow.validate().unwrap();

        let result =
            execute_workflow(&invoker, &workflow, &CancellationToken::new()).await;

        assert!(result.completed);
        assert_eq!(result.failed_step_index, None);
        assert_eq!(
            result.step_results[1].resolved_args["user_id"],
            json!("123")
        );
        assert_eq!(
            result.data_flow,
            vec![DataFlowEdge {
                from_step: 0,
                to_step: 1,
                param: "user_id".to_string(),
                source_path: "result.id".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_non_optional_failure_halts() {
        let invoker = ScriptedInvoker::new()
            .with_error_response("step_one", "boom")
            .with_response("step_two", json!({}));

        let workflow = WorkflowDefinition {
            name: "halting".into(),
            steps: vec![
                WorkflowStep {
                    tool: "step_one".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::new(),
                    optional: false,
                    assertions: vec![],
                },
                WorkflowStep {
                    tool: "step_two".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::new(),
                    optional: false,
                    assertions: vec![],
                },
            ],
            discovered: false,
        };

        let result =
            execute_workflow(&invoker, &workflow, &CancellationToken::new()).await;
        assert!(!result.completed);
        assert_eq!(result.failed_step_index, Some(0));
        assert_eq!(result.step_results.len(), 1);
        assert_eq!(invoker.calls("step_two"), 0);
    }

    #[tokio::test]
    async fn test_optional_failure_continues() {
        let invoker = ScriptedInvoker::new()
            .with_error_response("step_one", "boom")
            .with_response("step_two", json!({"ok": true}));

        let workflow = WorkflowDefinition {
            name: "tolerant".into(),
            steps: vec![
                WorkflowStep {
                    tool: "step_one".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::new(),
                    optional: true,
                    assertions: vec![],
                },
                WorkflowStep {
                    tool: "step_two".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::new(),
                    optional: false,
                    assertions: vec![],
                },
            ],
            discovered: false,
        };

        let result =
            execute_workflow(&invoker, &workflow, &CancellationToken::new()).await;
        assert!(result.completed);
        assert_eq!(result.failed_step_index, None);
        assert!(!result.step_results[0].passed);
        assert!(result.step_results[1].passed);
    }

    #[tokio::test]
    async fn test_step_assertions_evaluated() {
        let invoker =
            ScriptedInvoker::new().with_response("create_user", json!({"id": "123"}));

        let workflow = WorkflowDefinition {
            name: "asserted".into(),
            steps: vec![WorkflowStep {
                tool: "create_user".into(),
                args: json!({}),
                arg_mapping: BTreeMap::new(),
                optional: false,
                assertions: vec![Assertion {
                    path: "result.id".to_string(),
                    condition: crate::scenario::AssertionCondition::Matches,
                    value: Some(json!("^\\d+$")),
                }],
            }],
            discovered: false,
        };

        let result =
            execute_workflow(&invoker, &workflow, &CancellationToken::new()).await;
        assert!(result.completed);
        assert!(result.step_results[0].passed);
        assert!(result.step_results[0].assertion_results[0].passed);
    }

    #[tokio::test]
    async fn test_unresolvable_mapping_fails_step() {
        let invoker = ScriptedInvoker::new()
            .with_response("create_user", json!({"id": "123"}))
            .with_response("update_user", json!({}));

        let workflow = WorkflowDefinition {
            name: "bad-path".into(),
            steps: vec![
                WorkflowStep {
                    tool: "create_user".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::new(),
                    optional: false,
                    assertions: vec![],
                },
                WorkflowStep {
                    tool: "update_user".into(),
                    args: json!({}),
                    arg_mapping: BTreeMap::from([(
                        "user_id".to_string(),
                        "$steps[0].result.missing_field".to_string(),
                    )]),
                    optional: false,
                    assertions: vec![],
                },
            ],
            discovered: false,
        };

        let result =
            execute_workflow(&invoker, &workflow, &CancellationToken::new()).await;
        assert_eq!(result.failed_step_index, Some(1));
        assert_eq!(invoker.calls("update_user"), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_execution() {
        let invoker = ScriptedInvoker::new().with_response("a", json!({}));
        let workflow = WorkflowDefinition {
            name: "cancelled".into(),
            steps: vec![WorkflowStep {
                tool: "a".into(),
                args: json!({}),
                arg_mapping: BTreeMap::new(),
                optional: false,
                assertions: vec![],
            }],
            discovered: false,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = execute_workflow(&invoker, &workflow, &cancel).await;
        assert!(result.cancelled);
        assert!(result.step_results.is_empty());
    }

    #[test]
    fn test_workflow_yaml() {
        let yaml = r#"
- name: create then fetch
  steps:
    - tool: create_item
      args:
        title: test
    - tool: get_item
      arg_mapping:
        item_id: "$steps[0].result.id"
"#;
        let workflows = parse_workflows(yaml).unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].steps.len(), 2);
        assert!(!workflows[0].discovered);
    }
}
