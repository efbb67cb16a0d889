//! Question generation: LLM-backed and structural.
//!
//! In structural mode (or when no LLM is configured) questions are
//! synthesized deterministically from the tool schema: one representative
//! value per parameter type plus boundary cases. LLM generation asks the
//! model for a JSON array of questions constrained by the persona guidance
//! and the tool schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use bellwether_llm::{LlmResult, parse_json};
use bellwether_protocol::Tool;

use crate::persona::Persona;
use crate::types::ExpectedOutcome;

/// Category of a generated question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    /// Well-formed, realistic usage
    HappyPath,
    /// Unusual but legal inputs
    EdgeCase,
    /// Inputs the tool should reject
    Error,
    /// Probes for unsafe behavior
    Security,
}

impl QuestionCategory {
    /// What a question of this category expects the call to do.
    pub fn expected_outcome(self) -> ExpectedOutcome {
        match self {
            Self::HappyPath => ExpectedOutcome::Success,
            Self::EdgeCase | Self::Security => ExpectedOutcome::Either,
            Self::Error => ExpectedOutcome::Error,
        }
    }
}

/// One generated question: intent plus concrete arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// The question's intent, in prose
    pub question: String,
    /// Category tag
    pub category: QuestionCategory,
    /// Arguments to call the tool with
    pub args: Value,
}

/// Build the generation prompt for one `(persona, tool)` pair.
///
/// Returns `(system_prompt, user_prompt)`.
pub fn build_generation_prompt(tool: &Tool, persona: &Persona, max: usize) -> (String, String) {
    let schema = serde_json::to_string_pretty(&tool.input_schema).unwrap_or_default();
    let description = tool.description.as_deref().unwrap_or("(no description)");
    let user = format!(
        "You are testing the tool `{}`.\n\
         Description: {}\n\
         Input schema:\n{}\n\n\
         {}\n\n\
         Produce up to {} test questions as a JSON array. Each element must be an object \
         with keys \"question\" (what the test probes, one sentence), \"category\" (one of \
         \"happy_path\", \"edge_case\", \"error\", \"security\"), and \"args\" (a JSON object \
         of arguments conforming to the schema, or deliberately violating it for error \
         questions). Respond with the JSON array only.",
        tool.name, description, schema, persona.guidance, max
    );
    (persona.system_prompt.clone(), user)
}

/// Parse the model's question list, dropping malformed entries.
pub fn parse_generated_questions(text: &str, max: usize) -> LlmResult<Vec<Question>> {
    let raw: Vec<Value> = parse_json(text)?;
    let mut questions = Vec::new();
    for entry in raw {
        let Ok(question) = serde_json::from_value::<Question>(entry) else {
            continue;
        };
        if !question.args.is_object() {
            continue;
        }
        questions.push(question);
        if questions.len() >= max {
            break;
        }
    }
    Ok(questions)
}

/// Deterministic question synthesis from the tool schema.
///
/// Used in structural mode and as the fallback when LLM generation fails
/// or the budget is exhausted.
pub fn generate_structural_questions(
    tool: &Tool,
    max: usize,
    skip_error_tests: bool,
) -> Vec<Question> {
    let mut questions = Vec::new();
    let schema = &tool.input_schema;
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    // Happy path: representative value for every required parameter.
    let mut happy_args = Map::new();
    for name in &required {
        if let Some(property) = properties.get(name) {
            happy_args.insert(name.clone(), representative_value(property));
        }
    }
    questions.push(Question {
        question: format!("Call {} with representative required arguments", tool.name),
        category: QuestionCategory::HappyPath,
        args: Value::Object(happy_args.clone()),
    });

    // Full argument set when optional parameters exist.
    if properties.len() > required.len() {
        let mut full_args = happy_args.clone();
        for (name, property) in &properties {
            full_args
                .entry(name.clone())
                .or_insert_with(|| representative_value(property));
        }
        questions.push(Question {
            question: format!("Call {} with every parameter supplied", tool.name),
            category: QuestionCategory::HappyPath,
            args: Value::Object(full_args),
        });
    }

    // Boundary cases per parameter.
    for (name, property) in &properties {
        if questions.len() >= max {
            break;
        }
        for (label, value) in boundary_values(property) {
            if questions.len() >= max {
                break;
            }
            let mut args = happy_args.clone();
            args.insert(name.clone(), value);
            questions.push(Question {
                question: format!("Probe {} with {} `{}`", tool.name, label, name),
                category: QuestionCategory::EdgeCase,
                args: Value::Object(args),
            });
        }
    }

    if !skip_error_tests {
        // Missing required parameter.
        if let Some(first_required) = required.first()
            && questions.len() < max
        {
            let mut args = happy_args.clone();
            args.remove(first_required);
            questions.push(Question {
                question: format!(
                    "Call {} without required parameter `{first_required}`",
                    tool.name
                ),
                category: QuestionCategory::Error,
                args: Value::Object(args),
            });
        }

        // Wrong type for the first parameter.
        if let Some((name, property)) = properties.iter().next()
            && questions.len() < max
        {
            let mut args = happy_args.clone();
            args.insert(name.clone(), mismatched_value(property));
            questions.push(Question {
                question: format!("Call {} with a wrong-typed `{name}`", tool.name),
                category: QuestionCategory::Error,
                args: Value::Object(args),
            });
        }
    }

    questions.truncate(max);
    questions
}

/// One representative value for a schema property.
pub(crate) fn representative_value(property: &Value) -> Value {
    if let Some(values) = property.get("enum").and_then(Value::as_array)
        && let Some(first) = values.first()
    {
        return first.clone();
    }
    if let Some(default) = property.get("default") {
        return default.clone();
    }
    match property.get("type").and_then(Value::as_str) {
        Some("string") => {
            match property.get("format").and_then(Value::as_str) {
                Some("uri" | "url") => json!("https://example.com/item"),
                Some("email") => json!("user@example.com"),
                Some("date") => json!("2024-01-15"),
                Some("date-time") => json!("2024-01-15T10:30:00Z"),
                Some("uuid") => json!("00000000-0000-4000-8000-000000000000"),
                _ => json!("example"),
            }
        }
        Some("number") => property.get("minimum").cloned().unwrap_or(json!(1.5)),
        Some("integer") => property.get("minimum").cloned().unwrap_or(json!(1)),
        Some("boolean") => json!(true),
        Some("array") => {
            let item = property
                .get("items")
                .map_or(json!("example"), representative_value);
            json!([item])
        }
        Some("object") => json!({}),
        _ => json!("example"),
    }
}

/// Boundary values worth probing for a property.
fn boundary_values(property: &Value) -> Vec<(&'static str, Value)> {
    let mut values = Vec::new();
    match property.get("type").and_then(Value::as_str) {
        Some("string") => {
            values.push(("an empty", json!("")));
            if let Some(max_length) = property.get("maxLength").and_then(Value::as_u64) {
                values.push(("a maximum-length", json!("x".repeat(max_length as usize))));
            } else {
                values.push(("a very long", json!("x".repeat(2048))));
            }
        }
        Some("number" | "integer") => {
            if let Some(minimum) = property.get("minimum") {
                values.push(("the minimum allowed", minimum.clone()));
            }
            if let Some(maximum) = property.get("maximum") {
                values.push(("the maximum allowed", maximum.clone()));
            }
            if property.get("minimum").is_none() {
                values.push(("a zero", json!(0)));
                values.push(("a negative", json!(-1)));
            }
        }
        Some("array") => {
            values.push(("an empty", json!([])));
        }
        _ => {}
    }
    values
}

/// A value deliberately violating the property's declared type.
fn mismatched_value(property: &Value) -> Value {
    match property.get("type").and_then(Value::as_str) {
        Some("string") => json!(12345),
        _ => json!("not-the-declared-type"),
    }
}
