//! Baseline construction from a discovery and an interview result.

use serde_json::{Map, Value, json};
use tracing::debug;

use bellwether_client::Discovery;
use bellwether_core::value_type_name;
use bellwether_interview::{Interaction, InterviewResult};
use bellwether_protocol::CallToolResult;

use crate::canonical::short_hash;
use crate::model::{
    Baseline, BaselineAssertion, BaselineCapabilities, BaselineMetadata, CloudAssertionKind,
    InterviewRecord, PromptCapability, ResourceCapability, ServerFingerprint, ToolCapability,
    WorkflowRecord,
};

/// Inputs identifying the producing run.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Audit mode (`check` or `explore`)
    pub mode: String,
    /// Producing CLI version
    pub cli_version: String,
    /// Command line of the audited server, if spawned
    pub server_command: Option<String>,
    /// Model used for generation, if any
    pub model: Option<String>,
}

/// Builds sealed baselines.
#[derive(Debug, Default)]
pub struct BaselineBuilder;

impl BaselineBuilder {
    /// Build and seal a baseline.
    pub fn build(
        discovery: &Discovery,
        interview: &InterviewResult,
        context: &BuildContext,
    ) -> Baseline {
        let tools = discovery
            .tools
            .iter()
            .map(|tool| {
                let tool_interactions: Vec<&Interaction> = interview
                    .interactions
                    .iter()
                    .filter(|i| i.tool_name == tool.name)
                    .collect();
                build_tool_capability(tool, &tool_interactions)
            })
            .collect();

        let prompts = discovery
            .prompts
            .iter()
            .map(|prompt| {
                let mut arguments: Vec<String> = prompt
                    .arguments
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|a| a.name.clone())
                    .collect();
                arguments.sort();
                PromptCapability {
                    name: prompt.name.clone(),
                    description: prompt.description.clone(),
                    arguments,
                }
            })
            .collect();

        let resources = discovery
            .resources
            .iter()
            .map(|resource| ResourceCapability {
                name: resource.name.clone(),
                uri: resource.uri.clone(),
                mime_type: resource.mime_type.clone(),
            })
            .collect();

        let assertions = build_assertions(interview);

        let workflows: Vec<WorkflowRecord> = interview
            .workflow_results
            .iter()
            .map(|result| WorkflowRecord {
                name: result.name.clone(),
                tools: result
                    .step_results
                    .iter()
                    .map(|step| step.tool.clone())
                    .collect(),
                discovered: result.discovered,
            })
            .collect();

        let interviews = interview
            .interactions
            .iter()
            .map(|interaction| InterviewRecord {
                tool: interaction.tool_name.clone(),
                persona: interaction.persona.clone(),
                question: interaction.question.clone(),
                category: serde_json::to_value(interaction.category)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default(),
                ok: !interaction.failed(),
                latency_ms: interaction.latency_ms,
            })
            .collect();

        let duration_ms = (interview.finished_at - interview.started_at)
            .num_milliseconds()
            .max(0) as u64;

        debug!(
            "building baseline for {} ({} tools)",
            discovery.server_info.name,
            discovery.tools.len()
        );

        Baseline {
            version: context.cli_version.clone(),
            metadata: BaselineMetadata {
                mode: context.mode.clone(),
                generated_at: interview.finished_at,
                cli_version: context.cli_version.clone(),
                server_command: context.server_command.clone(),
                server_name: discovery.server_info.name.clone(),
                duration_ms,
                personas: interview.personas.clone(),
                model: context.model.clone(),
            },
            server: ServerFingerprint {
                name: discovery.server_info.name.clone(),
                version: discovery.server_info.version.clone(),
                protocol_version: discovery.protocol_version.as_str().to_string(),
                capabilities: discovery.capabilities.clone(),
            },
            capabilities: BaselineCapabilities {
                tools,
                prompts,
                resources,
            },
            interviews,
            tool_profiles: interview.tool_profiles.clone(),
            assertions,
            workflows: (!workflows.is_empty()).then_some(workflows),
            summary: interview.summary.clone(),
            hash: String::new(),
        }
        .sealed()
    }
}

fn build_tool_capability(
    tool: &bellwether_protocol::Tool,
    interactions: &[&Interaction],
) -> ToolCapability {
    let successes: Vec<Value> = interactions
        .iter()
        .filter(|i| !i.failed())
        .filter_map(|i| i.response.as_ref().map(response_value))
        .collect();

    let inferred_output_schema = successes
        .iter()
        .map(infer_shape)
        .reduce(|a, b| merge_shapes(&a, &b));
    let response_fingerprint = inferred_output_schema.as_ref().map(short_hash);

    let mut error_patterns: Vec<String> = interactions
        .iter()
        .filter(|i| i.failed())
        .filter_map(|i| {
            i.error
                .as_ref()
                .map(|e| e.message.clone())
                .or_else(|| i.response.as_ref().map(CallToolResult::text))
        })
        .map(|text| normalize_error_pattern(&text))
        .filter(|pattern| !pattern.is_empty())
        .collect();
    error_patterns.sort();
    error_patterns.dedup();

    ToolCapability {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
        schema_hash: short_hash(&tool.input_schema),
        response_fingerprint,
        inferred_output_schema,
        error_patterns,
    }
}

/// Tool profiles in cloud-assertion form: behavioral notes become
/// `expects`, limitations `requires`, security notes `warns`, plus a
/// confidence note.
fn build_assertions(interview: &InterviewResult) -> Vec<BaselineAssertion> {
    let mut assertions = Vec::new();
    for profile in &interview.tool_profiles {
        for note in &profile.behavioral_notes {
            assertions.push(BaselineAssertion {
                tool: profile.name.clone(),
                kind: CloudAssertionKind::Expects,
                text: note.clone(),
            });
        }
        for limitation in &profile.limitations {
            assertions.push(BaselineAssertion {
                tool: profile.name.clone(),
                kind: CloudAssertionKind::Requires,
                text: limitation.clone(),
            });
        }
        for warning in &profile.security_notes {
            assertions.push(BaselineAssertion {
                tool: profile.name.clone(),
                kind: CloudAssertionKind::Warns,
                text: warning.clone(),
            });
        }
        assertions.push(BaselineAssertion {
            tool: profile.name.clone(),
            kind: CloudAssertionKind::Notes,
            text: format!(
                "confidence {:.2} over {} interactions",
                profile.confidence, profile.interaction_count
            ),
        });
    }
    assertions
}

/// Observed response as a JSON value: structured content first, parsed
/// text second, raw text last.
fn response_value(result: &CallToolResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    let text = result.text();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Type skeleton of a response value, as a pseudo-schema.
fn infer_shape(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut properties = Map::new();
            for (key, item) in map {
                properties.insert(key.clone(), infer_shape(item));
            }
            json!({"type": "object", "properties": properties})
        }
        Value::Array(items) => {
            let item_shape = items.first().map_or(json!({"type": "unknown"}), infer_shape);
            json!({"type": "array", "items": item_shape})
        }
        other => json!({"type": value_type_name(other)}),
    }
}

/// Merge shapes from multiple samples; conflicting types become "mixed".
fn merge_shapes(a: &Value, b: &Value) -> Value {
    if a == b {
        return a.clone();
    }
    let a_type = a.get("type").and_then(Value::as_str);
    let b_type = b.get("type").and_then(Value::as_str);
    if a_type != b_type {
        return json!({"type": "mixed"});
    }
    match a_type {
        Some("object") => {
            let empty = Map::new();
            let a_props = a.get("properties").and_then(Value::as_object).unwrap_or(&empty);
            let b_props = b.get("properties").and_then(Value::as_object).unwrap_or(&empty);
            let mut merged = Map::new();
            for (key, a_value) in a_props {
                match b_props.get(key) {
                    Some(b_value) => merged.insert(key.clone(), merge_shapes(a_value, b_value)),
                    None => merged.insert(key.clone(), a_value.clone()),
                };
            }
            for (key, b_value) in b_props {
                merged.entry(key.clone()).or_insert_with(|| b_value.clone());
            }
            json!({"type": "object", "properties": merged})
        }
        Some("array") => {
            let a_items = a.get("items").cloned().unwrap_or(json!({"type": "unknown"}));
            let b_items = b.get("items").cloned().unwrap_or(json!({"type": "unknown"}));
            json!({"type": "array", "items": merge_shapes(&a_items, &b_items)})
        }
        _ => json!({"type": "mixed"}),
    }
}

/// Normalize an error message into a stable pattern: lowercase, digit runs
/// collapsed, whitespace collapsed, bounded length.
fn normalize_error_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(120));
    let mut in_digits = false;
    let mut in_space = false;
    for c in text.chars() {
        if out.len() >= 120 {
            break;
        }
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('N');
                in_digits = true;
            }
            in_space = false;
        } else if c.is_whitespace() {
            if !in_space && !out.is_empty() {
                out.push(' ');
                in_space = true;
            }
            in_digits = false;
        } else {
            out.extend(c.to_lowercase());
            in_digits = false;
            in_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellwether_interview::{ExpectedOutcome, QuestionCategory, ToolProfile};
    use bellwether_protocol::{ContentBlock, Implementation, ProtocolVersion, Tool};
    use pretty_assertions::assert_eq;

    fn tool(name: &str, schema: Value) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: Some("test tool".to_string()),
            input_schema: schema,
            output_schema: None,
            annotations: None,
        }
    }

    fn discovery(tools: Vec<Tool>) -> Discovery {
        Discovery {
            server_info: Implementation {
                name: "demo".to_string(),
                title: None,
                version: "1.0.0".to_string(),
            },
            protocol_version: ProtocolVersion::from("2025-06-18"),
            capabilities: vec!["tools".to_string()],
            tools,
            prompts: vec![],
            resources: vec![],
            discovered_at: chrono::Utc::now(),
        }
    }

    fn interaction(tool: &str, ok: bool, body: Value) -> Interaction {
        Interaction {
            tool_name: tool.to_string(),
            persona: "careful-user".to_string(),
            question: "probe".to_string(),
            category: QuestionCategory::HappyPath,
            args: json!({}),
            response: Some(CallToolResult {
                content: vec![ContentBlock::text(body.to_string())],
                is_error: Some(!ok),
                structured_content: ok.then_some(body),
            }),
            error: None,
            latency_ms: 5,
            expected_outcome: ExpectedOutcome::Success,
            outcome_correct: Some(ok),
            from_cache: false,
        }
    }

    fn interview(interactions: Vec<Interaction>, profiles: Vec<ToolProfile>) -> InterviewResult {
        InterviewResult {
            interactions,
            tool_profiles: profiles,
            prompt_checks: vec![],
            resource_checks: vec![],
            scenario_results: vec![],
            workflow_results: vec![],
            summary: "summary".to_string(),
            personas: vec!["careful-user".to_string()],
            cancelled: false,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        }
    }

    fn context() -> BuildContext {
        BuildContext {
            mode: "explore".to_string(),
            cli_version: "0.4.0".to_string(),
            server_command: None,
            model: None,
        }
    }

    fn simple_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    #[test]
    fn test_baseline_determinism_across_runs() {
        // Property 1: the same interview result always hashes identically.
        let build = || {
            BaselineBuilder::build(
                &discovery(vec![tool("echo", simple_schema())]),
                &interview(
                    vec![interaction("echo", true, json!({"echoed": "hi"}))],
                    vec![],
                ),
                &context(),
            )
        };
        let a = build();
        let b = build();
        assert_eq!(a.hash, b.hash);
        assert!(a.verify());
    }

    #[test]
    fn test_schema_hash_ignores_orderings() {
        // Property 4: key order, required order, and 1 vs 1.0 are invisible.
        let first = tool(
            "t",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer", "minimum": 1}},
                "required": ["b", "a"]
            }),
        );
        let second = tool(
            "t",
            json!({
                "required": ["a", "b"],
                "properties": {"a": {"minimum": 1.0, "type": "integer"}},
                "type": "object"
            }),
        );
        let a = build_tool_capability(&first, &[]);
        let b = build_tool_capability(&second, &[]);
        assert_eq!(a.schema_hash, b.schema_hash);
    }

    #[test]
    fn test_response_fingerprint_from_successes() {
        let interactions = vec![
            interaction("echo", true, json!({"id": "1", "name": "a"})),
            interaction("echo", true, json!({"id": "2", "name": "b"})),
        ];
        let refs: Vec<&Interaction> = interactions.iter().collect();
        let capability = build_tool_capability(&tool("echo", simple_schema()), &refs);

        assert!(capability.response_fingerprint.is_some());
        let shape = capability.inferred_output_schema.unwrap();
        assert_eq!(shape["type"], "object");
        assert_eq!(shape["properties"]["id"]["type"], "string");
    }

    #[test]
    fn test_mixed_shapes_merge() {
        let interactions = vec![
            interaction("echo", true, json!({"value": "text"})),
            interaction("echo", true, json!({"value": 42})),
        ];
        let refs: Vec<&Interaction> = interactions.iter().collect();
        let capability = build_tool_capability(&tool("echo", simple_schema()), &refs);
        let shape = capability.inferred_output_schema.unwrap();
        assert_eq!(shape["properties"]["value"]["type"], "mixed");
    }

    #[test]
    fn test_error_patterns_normalized() {
        let failing = interaction("echo", false, json!("item 12345 not found"));
        let refs = vec![&failing];
        let capability = build_tool_capability(&tool("echo", simple_schema()), &refs);
        assert_eq!(capability.error_patterns, vec!["\"item N not found\""]);
    }

    #[test]
    fn test_assertions_from_profiles() {
        let profile = ToolProfile {
            name: "echo".to_string(),
            behavioral_notes: vec!["returns input".to_string()],
            limitations: vec!["requires text".to_string()],
            security_notes: vec!["reflects raw input".to_string()],
            confidence: 0.9,
            interaction_count: 4,
        };
        let baseline = BaselineBuilder::build(
            &discovery(vec![tool("echo", simple_schema())]),
            &interview(vec![], vec![profile]),
            &context(),
        );

        let kinds: Vec<CloudAssertionKind> =
            baseline.assertions.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&CloudAssertionKind::Expects));
        assert!(kinds.contains(&CloudAssertionKind::Requires));
        assert!(kinds.contains(&CloudAssertionKind::Warns));
        assert!(kinds.contains(&CloudAssertionKind::Notes));
    }

    #[test]
    fn test_normalize_error_pattern() {
        assert_eq!(
            normalize_error_pattern("User 42 NOT found  \n at row 7"),
            "user N not found at row N"
        );
        assert_eq!(normalize_error_pattern(""), "");
        assert!(normalize_error_pattern(&"x".repeat(500)).len() <= 121);
    }
}
