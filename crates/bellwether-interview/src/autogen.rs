//! Offline workflow auto-generation from the discovered tool list.
//!
//! Pairs create/get/list/update/delete tools by verb prefix and entity name,
//! generates minimal required arguments, and infers id bindings from the
//! creating step into the consuming step. Produces at most `max_workflows`
//! unique definitions, all tagged `discovered`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use bellwether_protocol::Tool;

use crate::question::representative_value;
use crate::workflow::{WorkflowDefinition, WorkflowStep};

const CREATE_VERBS: &[&str] = &["create", "add", "new", "insert", "register", "post"];
const READ_VERBS: &[&str] = &["get", "fetch", "read", "retrieve", "show"];
const UPDATE_VERBS: &[&str] = &["update", "edit", "set", "modify", "patch"];
const DELETE_VERBS: &[&str] = &["delete", "remove", "destroy", "drop"];
const LIST_VERBS: &[&str] = &["list", "search", "find", "query"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Create,
    Read,
    Update,
    Delete,
    List,
}

/// Split `create_user` / `createUser` / `users.create` into verb + entity.
fn classify(name: &str) -> Option<(Verb, String)> {
    let normalized = normalize(name);
    let mut parts = normalized.splitn(2, '_');
    let first = parts.next()?;
    let rest = parts.next().unwrap_or("");

    let verb = if CREATE_VERBS.contains(&first) {
        Verb::Create
    } else if READ_VERBS.contains(&first) {
        Verb::Read
    } else if UPDATE_VERBS.contains(&first) {
        Verb::Update
    } else if DELETE_VERBS.contains(&first) {
        Verb::Delete
    } else if LIST_VERBS.contains(&first) {
        Verb::List
    } else {
        return None;
    };

    if rest.is_empty() {
        return None;
    }
    Some((verb, singularize(rest)))
}

/// Lowercase and convert camelCase / dots / dashes to underscores.
fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == '.' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

fn singularize(entity: &str) -> String {
    if let Some(stem) = entity.strip_suffix("ies") {
        format!("{stem}y")
    } else if entity.ends_with("ses") || entity.ends_with("xes") {
        entity[..entity.len() - 2].to_string()
    } else if entity.ends_with('s') && !entity.ends_with("ss") {
        entity[..entity.len() - 1].to_string()
    } else {
        entity.to_string()
    }
}

/// Minimal required arguments for a tool, excluding id-shaped parameters
/// that a mapping will fill.
fn minimal_args(tool: &Tool, skip_id_params: bool) -> Map<String, Value> {
    let mut args = Map::new();
    let Some(properties) = tool.input_schema.get("properties").and_then(Value::as_object) else {
        return args;
    };
    let required: Vec<&str> = tool
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for name in required {
        if skip_id_params && is_id_param(name) {
            continue;
        }
        if let Some(property) = properties.get(name) {
            args.insert(name.to_string(), representative_value(property));
        }
    }
    args
}

fn is_id_param(name: &str) -> bool {
    let normalized = normalize(name);
    normalized == "id" || normalized.ends_with("_id") || normalized == "uri"
}

/// The id-shaped parameter a consuming tool needs bound, if any.
fn id_param(tool: &Tool) -> Option<String> {
    let properties = tool.input_schema.get("properties").and_then(Value::as_object)?;
    let required: Vec<&str> = tool
        .input_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_else(|| properties.keys().map(String::as_str).collect());
    required
        .iter()
        .find(|name| is_id_param(name))
        .map(|name| (*name).to_string())
}

/// Generate up to `max_workflows` create-then-consume workflows.
pub fn generate_workflows(tools: &[Tool], max_workflows: usize) -> Vec<WorkflowDefinition> {
    // entity -> verb -> tool
    let mut by_entity: BTreeMap<String, BTreeMap<&'static str, &Tool>> = BTreeMap::new();
    for tool in tools {
        let Some((verb, entity)) = classify(&tool.name) else {
            continue;
        };
        let key = match verb {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::List => "list",
        };
        by_entity.entry(entity).or_default().entry(key).or_insert(tool);
    }

    let mut workflows = Vec::new();
    for (entity, verbs) in &by_entity {
        if workflows.len() >= max_workflows {
            break;
        }
        let Some(create) = verbs.get("create") else {
            continue;
        };

        // Prefer read, then update, then delete as the consuming step
        for consumer_verb in ["read", "update", "delete"] {
            if workflows.len() >= max_workflows {
                break;
            }
            let Some(consumer) = verbs.get(consumer_verb) else {
                continue;
            };
            let Some(id_name) = id_param(consumer) else {
                debug!(
                    "skipping {}: no id parameter to bind from {}",
                    consumer.name, create.name
                );
                continue;
            };

            let mut consumer_args = minimal_args(consumer, true);
            consumer_args.remove(&id_name);

            workflows.push(WorkflowDefinition {
                name: format!("{entity}: {} then {}", create.name, consumer.name),
                steps: vec![
                    WorkflowStep {
                        tool: create.name.clone(),
                        args: Value::Object(minimal_args(create, false)),
                        arg_mapping: BTreeMap::new(),
                        optional: false,
                        assertions: vec![],
                    },
                    WorkflowStep {
                        tool: consumer.name.clone(),
                        args: Value::Object(consumer_args),
                        arg_mapping: BTreeMap::from([(
                            id_name,
                            "$steps[0].result.id".to_string(),
                        )]),
                        optional: false,
                        assertions: vec![],
                    },
                ],
                discovered: true,
            });
        }
    }

    workflows
}
