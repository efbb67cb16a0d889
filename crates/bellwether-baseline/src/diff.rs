//! Semantic drift analysis between two baselines.
//!
//! Produces a tool-set delta, a per-parameter schema delta with breaking
//! classification, a clamped 0-100 risk score, an overall severity, a
//! migration-complexity estimate, prioritized action items, and the set of
//! recorded workflows touched by the changes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{Baseline, ToolCapability};

/// Overall severity of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSeverity {
    /// No changes
    None,
    /// Additive or cosmetic changes only
    Info,
    /// Changes consumers should review
    Warning,
    /// Removals or incompatible modifications
    Breaking,
}

/// Kind of a single schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// New optional parameter
    ParameterAdded,
    /// Parameter removed
    ParameterRemoved,
    /// Parameter type changed
    TypeChanged,
    /// Parameter became required
    RequiredAdded,
    /// Parameter no longer required
    RequiredRemoved,
    /// Enum gained a value
    EnumValueAdded,
    /// Enum lost a value
    EnumValueRemoved,
    /// A constraint appeared
    ConstraintAdded,
    /// A constraint disappeared
    ConstraintRemoved,
    /// A constraint narrowed the accepted values
    ConstraintTightened,
    /// A constraint widened the accepted values
    ConstraintRelaxed,
    /// Description text changed
    DescriptionChanged,
    /// Default value changed
    DefaultChanged,
    /// Format annotation changed
    FormatChanged,
    /// Schema hash matches but the observed response fingerprint moved;
    /// surfaced for reconciliation instead of silently picking a signal
    FingerprintDivergence,
}

/// One schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Change kind
    pub kind: ChangeKind,
    /// Path of the changed element (e.g. `properties.name.maxLength`)
    pub path: String,
    /// Whether the change breaks existing callers
    pub breaking: bool,
    /// Value before the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    /// Value after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    /// Human-readable description
    pub description: String,
}

/// Changes to one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiff {
    /// Tool name
    pub name: String,
    /// Schema hash before
    pub schema_hash_before: String,
    /// Schema hash after
    pub schema_hash_after: String,
    /// Individual changes
    pub changes: Vec<SchemaChange>,
}

/// Migration effort estimate, from breaking-change count bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationComplexity {
    /// Nothing to do
    Trivial,
    /// One or two breaking changes
    Simple,
    /// Three to five breaking changes
    Moderate,
    /// More than five breaking changes
    Complex,
}

/// Action item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    /// Informational
    Low,
    /// Worth reviewing
    Medium,
    /// Likely to break consumers
    High,
    /// Breaks consumers now
    Critical,
}

/// One prioritized remediation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    /// Priority
    pub priority: ActionPriority,
    /// Affected tool
    pub tool: String,
    /// What changed
    pub issue: String,
    /// Suggested remediation
    pub remediation: String,
}

/// A structured diff between two baselines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineDiff {
    /// Overall severity (max over all changes)
    pub severity: DiffSeverity,
    /// Tools present only in the new baseline
    pub tools_added: Vec<String>,
    /// Tools present only in the old baseline
    pub tools_removed: Vec<String>,
    /// Tools whose schemas or fingerprints changed
    pub tools_modified: Vec<ToolDiff>,
    /// Risk score, 0-100
    pub risk_score: u8,
    /// Migration effort estimate
    pub migration_complexity: MigrationComplexity,
    /// Prioritized remediation items, most severe first
    pub action_items: Vec<ActionItem>,
    /// Recorded workflows whose tool sequence intersects a modified or
    /// removed tool
    pub affected_workflows: Vec<String>,
}

/// Risk thresholds for the severity bands.
const RISK_BREAKING_THRESHOLD: u32 = 70;
const RISK_WARNING_THRESHOLD: u32 = 15;

/// Numeric constraints where an increase tightens.
const MIN_CONSTRAINTS: &[&str] = &["minimum", "minLength", "minItems"];
/// Numeric constraints where a decrease tightens.
const MAX_CONSTRAINTS: &[&str] = &["maximum", "maxLength", "maxItems"];

/// Compare two baselines.
pub fn diff_baselines(before: &Baseline, after: &Baseline) -> BaselineDiff {
    debug!(
        "diffing baselines {} -> {}",
        before.hash, after.hash
    );

    let mut tools_added = Vec::new();
    let mut tools_removed = Vec::new();
    let mut tools_modified = Vec::new();

    for old_tool in &before.capabilities.tools {
        match after
            .capabilities
            .tools
            .iter()
            .find(|t| t.name == old_tool.name)
        {
            None => tools_removed.push(old_tool.name.clone()),
            Some(new_tool) => {
                let mut changes = Vec::new();
                if old_tool.schema_hash != new_tool.schema_hash {
                    changes.extend(diff_tool_schemas(old_tool, new_tool));
                } else if old_tool.response_fingerprint != new_tool.response_fingerprint
                    && old_tool.response_fingerprint.is_some()
                    && new_tool.response_fingerprint.is_some()
                {
                    // Same declared schema, different observed behavior:
                    // both signals stay in the diff as a reconciliation
                    // warning.
                    changes.push(SchemaChange {
                        kind: ChangeKind::FingerprintDivergence,
                        path: String::new(),
                        breaking: false,
                        before: old_tool
                            .response_fingerprint
                            .clone()
                            .map(Value::String),
                        after: new_tool
                            .response_fingerprint
                            .clone()
                            .map(Value::String),
                        description: format!(
                            "schema hash unchanged but observed response shape moved for '{}'",
                            old_tool.name
                        ),
                    });
                }
                if !changes.is_empty() {
                    tools_modified.push(ToolDiff {
                        name: old_tool.name.clone(),
                        schema_hash_before: old_tool.schema_hash.clone(),
                        schema_hash_after: new_tool.schema_hash.clone(),
                        changes,
                    });
                }
            }
        }
    }
    for new_tool in &after.capabilities.tools {
        if !before
            .capabilities
            .tools
            .iter()
            .any(|t| t.name == new_tool.name)
        {
            tools_added.push(new_tool.name.clone());
        }
    }

    let risk_score = compute_risk(&tools_removed, &tools_added, &tools_modified);
    let severity = compute_severity(&tools_removed, &tools_added, &tools_modified, risk_score);
    let breaking_count = count_breaking(&tools_removed, &tools_modified);
    let migration_complexity = match breaking_count {
        0 => MigrationComplexity::Trivial,
        1..=2 => MigrationComplexity::Simple,
        3..=5 => MigrationComplexity::Moderate,
        _ => MigrationComplexity::Complex,
    };
    let action_items = build_action_items(&tools_removed, &tools_added, &tools_modified);
    let affected_workflows =
        affected_workflows(before, after, &tools_removed, &tools_modified);

    BaselineDiff {
        severity,
        tools_added,
        tools_removed,
        tools_modified,
        risk_score: risk_score.min(100) as u8,
        migration_complexity,
        action_items,
        affected_workflows,
    }
}

/// Per-parameter schema comparison.
fn diff_tool_schemas(old: &ToolCapability, new: &ToolCapability) -> Vec<SchemaChange> {
    let mut changes = Vec::new();
    let empty = Map::new();
    let old_props = old
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let new_props = new
        .input_schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let old_required = required_set(&old.input_schema);
    let new_required = required_set(&new.input_schema);

    for (name, old_prop) in old_props {
        let path = format!("properties.{name}");
        match new_props.get(name) {
            None => changes.push(SchemaChange {
                kind: ChangeKind::ParameterRemoved,
                path,
                breaking: true,
                before: Some(old_prop.clone()),
                after: None,
                description: format!("parameter '{name}' was removed"),
            }),
            Some(new_prop) => {
                changes.extend(diff_parameter(name, &path, old_prop, new_prop));
                let was_required = old_required.contains(&name.as_str());
                let is_required = new_required.contains(&name.as_str());
                if !was_required && is_required {
                    changes.push(SchemaChange {
                        kind: ChangeKind::RequiredAdded,
                        path: path.clone(),
                        breaking: true,
                        before: Some(Value::Bool(false)),
                        after: Some(Value::Bool(true)),
                        description: format!("parameter '{name}' became required"),
                    });
                } else if was_required && !is_required {
                    changes.push(SchemaChange {
                        kind: ChangeKind::RequiredRemoved,
                        path: path.clone(),
                        breaking: false,
                        before: Some(Value::Bool(true)),
                        after: Some(Value::Bool(false)),
                        description: format!("parameter '{name}' is no longer required"),
                    });
                }
            }
        }
    }

    for (name, new_prop) in new_props {
        if old_props.contains_key(name) {
            continue;
        }
        let path = format!("properties.{name}");
        let required = new_required.contains(&name.as_str());
        if required {
            changes.push(SchemaChange {
                kind: ChangeKind::RequiredAdded,
                path,
                breaking: true,
                before: None,
                after: Some(new_prop.clone()),
                description: format!("new required parameter '{name}'"),
            });
        } else {
            changes.push(SchemaChange {
                kind: ChangeKind::ParameterAdded,
                path,
                breaking: false,
                before: None,
                after: Some(new_prop.clone()),
                description: format!("new optional parameter '{name}'"),
            });
        }
    }

    changes
}

fn required_set(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Compare one parameter's sub-schema.
fn diff_parameter(name: &str, path: &str, old: &Value, new: &Value) -> Vec<SchemaChange> {
    let mut changes = Vec::new();

    let old_type = old.get("type");
    let new_type = new.get("type");
    if old_type != new_type {
        changes.push(SchemaChange {
            kind: ChangeKind::TypeChanged,
            path: format!("{path}.type"),
            breaking: true,
            before: old_type.cloned(),
            after: new_type.cloned(),
            description: format!("parameter '{name}' changed type"),
        });
    }

    // Enum membership
    let old_enum = enum_values(old);
    let new_enum = enum_values(new);
    if let (Some(old_enum), Some(new_enum)) = (&old_enum, &new_enum) {
        for value in old_enum {
            if !new_enum.contains(value) {
                changes.push(SchemaChange {
                    kind: ChangeKind::EnumValueRemoved,
                    path: format!("{path}.enum"),
                    breaking: true,
                    before: Some(value.clone()),
                    after: None,
                    description: format!("enum value {value} removed from '{name}'"),
                });
            }
        }
        for value in new_enum {
            if !old_enum.contains(value) {
                changes.push(SchemaChange {
                    kind: ChangeKind::EnumValueAdded,
                    path: format!("{path}.enum"),
                    breaking: false,
                    before: None,
                    after: Some(value.clone()),
                    description: format!("enum value {value} added to '{name}'"),
                });
            }
        }
    }

    // Numeric constraints
    for key in MIN_CONSTRAINTS.iter().chain(MAX_CONSTRAINTS.iter()) {
        changes.extend(diff_numeric_constraint(name, path, key, old, new));
    }

    // Pattern: any change tightens
    match (old.get("pattern"), new.get("pattern")) {
        (Some(old_pattern), Some(new_pattern)) if old_pattern != new_pattern => {
            changes.push(SchemaChange {
                kind: ChangeKind::ConstraintTightened,
                path: format!("{path}.pattern"),
                breaking: true,
                before: Some(old_pattern.clone()),
                after: Some(new_pattern.clone()),
                description: format!("pattern constraint on '{name}' changed"),
            });
        }
        (None, Some(new_pattern)) => changes.push(SchemaChange {
            kind: ChangeKind::ConstraintAdded,
            path: format!("{path}.pattern"),
            breaking: true,
            before: None,
            after: Some(new_pattern.clone()),
            description: format!("pattern constraint added to '{name}'"),
        }),
        (Some(old_pattern), None) => changes.push(SchemaChange {
            kind: ChangeKind::ConstraintRemoved,
            path: format!("{path}.pattern"),
            breaking: false,
            before: Some(old_pattern.clone()),
            after: None,
            description: format!("pattern constraint removed from '{name}'"),
        }),
        _ => {}
    }

    // Format annotation
    match (old.get("format"), new.get("format")) {
        (old_format, new_format) if old_format != new_format => {
            changes.push(SchemaChange {
                kind: ChangeKind::FormatChanged,
                path: format!("{path}.format"),
                breaking: true,
                before: old_format.cloned(),
                after: new_format.cloned(),
                description: format!("format of '{name}' changed"),
            });
        }
        _ => {}
    }

    // Default value
    match (old.get("default"), new.get("default")) {
        (old_default, new_default) if old_default != new_default => {
            changes.push(SchemaChange {
                kind: ChangeKind::DefaultChanged,
                path: format!("{path}.default"),
                breaking: false,
                before: old_default.cloned(),
                after: new_default.cloned(),
                description: format!("default of '{name}' changed"),
            });
        }
        _ => {}
    }

    // Description text
    match (old.get("description"), new.get("description")) {
        (old_description, new_description) if old_description != new_description => {
            changes.push(SchemaChange {
                kind: ChangeKind::DescriptionChanged,
                path: format!("{path}.description"),
                breaking: false,
                before: old_description.cloned(),
                after: new_description.cloned(),
                description: format!("description of '{name}' changed"),
            });
        }
        _ => {}
    }

    changes
}

fn enum_values(property: &Value) -> Option<Vec<Value>> {
    property.get("enum").and_then(Value::as_array).cloned()
}

/// Compare one numeric constraint under the tightening rules:
/// increases tighten `min*`, decreases tighten `max*`, and adding any
/// constraint tightens.
fn diff_numeric_constraint(
    name: &str,
    path: &str,
    key: &str,
    old: &Value,
    new: &Value,
) -> Vec<SchemaChange> {
    let old_value = old.get(key).and_then(Value::as_f64);
    let new_value = new.get(key).and_then(Value::as_f64);
    let constraint_path = format!("{path}.{key}");

    match (old_value, new_value) {
        (None, None) => Vec::new(),
        (None, Some(added)) => vec![SchemaChange {
            kind: ChangeKind::ConstraintAdded,
            path: constraint_path,
            breaking: true,
            before: None,
            after: Some(number(added)),
            description: format!("{key} constraint added to '{name}'"),
        }],
        (Some(removed), None) => vec![SchemaChange {
            kind: ChangeKind::ConstraintRemoved,
            path: constraint_path,
            breaking: false,
            before: Some(number(removed)),
            after: None,
            description: format!("{key} constraint removed from '{name}'"),
        }],
        (Some(before), Some(after)) if (before - after).abs() < f64::EPSILON => Vec::new(),
        (Some(before), Some(after)) => {
            let tightened = if MIN_CONSTRAINTS.contains(&key) {
                after > before
            } else {
                after < before
            };
            vec![SchemaChange {
                kind: if tightened {
                    ChangeKind::ConstraintTightened
                } else {
                    ChangeKind::ConstraintRelaxed
                },
                path: constraint_path,
                breaking: tightened,
                before: Some(number(before)),
                after: Some(number(after)),
                description: format!(
                    "{key} on '{name}' {} from {before} to {after}",
                    if tightened { "tightened" } else { "relaxed" }
                ),
            }]
        }
    }
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Per-change risk weights, summed then clamped.
fn change_weight(change: &SchemaChange) -> u32 {
    match change.kind {
        ChangeKind::ParameterRemoved => 15,
        ChangeKind::RequiredAdded => 15,
        ChangeKind::TypeChanged => 12,
        ChangeKind::EnumValueRemoved => 10,
        ChangeKind::ConstraintTightened | ChangeKind::ConstraintAdded => 8,
        ChangeKind::FormatChanged => 8,
        ChangeKind::FingerprintDivergence => 6,
        ChangeKind::DefaultChanged => 3,
        ChangeKind::ConstraintRelaxed
        | ChangeKind::ConstraintRemoved
        | ChangeKind::RequiredRemoved
        | ChangeKind::EnumValueAdded
        | ChangeKind::ParameterAdded => 2,
        ChangeKind::DescriptionChanged => 1,
    }
}

fn compute_risk(removed: &[String], added: &[String], modified: &[ToolDiff]) -> u32 {
    let mut risk = 0u32;
    risk += removed.len() as u32 * 25;
    risk += added.len() as u32;
    for diff in modified {
        for change in &diff.changes {
            risk += change_weight(change);
        }
    }
    risk.min(100)
}

fn compute_severity(
    removed: &[String],
    added: &[String],
    modified: &[ToolDiff],
    risk: u32,
) -> DiffSeverity {
    let any_breaking = !removed.is_empty()
        || modified
            .iter()
            .any(|diff| diff.changes.iter().any(|change| change.breaking));
    if any_breaking || risk >= RISK_BREAKING_THRESHOLD {
        return DiffSeverity::Breaking;
    }
    if risk >= RISK_WARNING_THRESHOLD {
        return DiffSeverity::Warning;
    }
    if !modified.is_empty() || !added.is_empty() {
        return DiffSeverity::Info;
    }
    DiffSeverity::None
}

fn count_breaking(removed: &[String], modified: &[ToolDiff]) -> usize {
    removed.len()
        + modified
            .iter()
            .map(|diff| diff.changes.iter().filter(|change| change.breaking).count())
            .sum::<usize>()
}

fn build_action_items(
    removed: &[String],
    added: &[String],
    modified: &[ToolDiff],
) -> Vec<ActionItem> {
    let mut items = Vec::new();
    for tool in removed {
        items.push(ActionItem {
            priority: ActionPriority::Critical,
            tool: tool.clone(),
            issue: format!("tool '{tool}' was removed"),
            remediation: format!(
                "remove calls to '{tool}' or pin the previous server version"
            ),
        });
    }
    for diff in modified {
        for change in &diff.changes {
            let priority = if change.breaking {
                ActionPriority::High
            } else if matches!(
                change.kind,
                ChangeKind::FingerprintDivergence | ChangeKind::DefaultChanged
            ) {
                ActionPriority::Medium
            } else {
                ActionPriority::Low
            };
            items.push(ActionItem {
                priority,
                tool: diff.name.clone(),
                issue: change.description.clone(),
                remediation: remediation_for(change),
            });
        }
    }
    for tool in added {
        items.push(ActionItem {
            priority: ActionPriority::Low,
            tool: tool.clone(),
            issue: format!("new tool '{tool}' is available"),
            remediation: "review whether existing integrations should adopt it".to_string(),
        });
    }
    items.sort_by(|a, b| b.priority.cmp(&a.priority));
    items
}

fn remediation_for(change: &SchemaChange) -> String {
    match change.kind {
        ChangeKind::RequiredAdded => {
            format!("supply a value at {} on every call", change.path)
        }
        ChangeKind::ParameterRemoved => {
            format!("stop sending {}", change.path)
        }
        ChangeKind::TypeChanged => {
            format!("convert the value sent at {} to the new type", change.path)
        }
        ChangeKind::EnumValueRemoved => {
            format!("migrate off the removed value at {}", change.path)
        }
        ChangeKind::ConstraintTightened | ChangeKind::ConstraintAdded => {
            format!("validate inputs against the new bound at {}", change.path)
        }
        ChangeKind::FormatChanged => {
            format!("re-validate the value format at {}", change.path)
        }
        ChangeKind::FingerprintDivergence => {
            "re-run the interview and reconcile schema vs observed behavior".to_string()
        }
        _ => "no action required; informational".to_string(),
    }
}

fn affected_workflows(
    before: &Baseline,
    after: &Baseline,
    removed: &[String],
    modified: &[ToolDiff],
) -> Vec<String> {
    let mut touched: Vec<&String> = removed.iter().collect();
    let modified_names: Vec<&String> = modified.iter().map(|diff| &diff.name).collect();
    touched.extend(modified_names);

    let mut names = Vec::new();
    for workflows in [&before.workflows, &after.workflows].into_iter().flatten() {
        for workflow in workflows {
            if workflow
                .tools
                .iter()
                .any(|tool| touched.iter().any(|t| *t == tool))
                && !names.contains(&workflow.name)
            {
                names.push(workflow.name.clone());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BaselineCapabilities, BaselineMetadata, ServerFingerprint, WorkflowRecord,
    };
    use crate::canonical::short_hash;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn capability(name: &str, schema: Value) -> ToolCapability {
        ToolCapability {
            schema_hash: short_hash(&schema),
            name: name.to_string(),
            description: None,
            input_schema: schema,
            response_fingerprint: None,
            inferred_output_schema: None,
            error_patterns: vec![],
        }
    }

    fn baseline(tools: Vec<ToolCapability>) -> Baseline {
        Baseline {
            version: "0.4.0".to_string(),
            metadata: BaselineMetadata {
                mode: "structural".to_string(),
                generated_at: chrono::Utc::now(),
                cli_version: "0.4.0".to_string(),
                server_command: None,
                server_name: "demo".to_string(),
                duration_ms: 0,
                personas: vec![],
                model: None,
            },
            server: ServerFingerprint {
                name: "demo".to_string(),
                version: "1.0.0".to_string(),
                protocol_version: "2025-06-18".to_string(),
                capabilities: vec!["tools".to_string()],
            },
            capabilities: BaselineCapabilities {
                tools,
                prompts: vec![],
                resources: vec![],
            },
            interviews: vec![],
            tool_profiles: vec![],
            assertions: vec![],
            workflows: None,
            summary: String::new(),
            hash: String::new(),
        }
        .sealed()
    }

    fn schema_with(properties: Value, required: Value) -> Value {
        json!({"type": "object", "properties": properties, "required": required})
    }

    #[test]
    fn test_identical_baselines_none() {
        // S1: identical discoveries produce a `none` diff.
        let schema = schema_with(json!({"x": {"type": "string"}}), json!(["x"]));
        let a = baseline(vec![capability("t1", schema.clone())]);
        let b = baseline(vec![capability("t1", schema)]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.severity, DiffSeverity::None);
        assert!(diff.tools_added.is_empty());
        assert!(diff.tools_removed.is_empty());
        assert!(diff.tools_modified.is_empty());
        assert_eq!(diff.risk_score, 0);
        assert_eq!(diff.migration_complexity, MigrationComplexity::Trivial);
    }

    #[test]
    fn test_removed_tool_is_breaking() {
        // S2: [t1, t2] -> [t1] is breaking with a critical action item.
        let schema = schema_with(json!({}), json!([]));
        let a = baseline(vec![
            capability("t1", schema.clone()),
            capability("t2", schema.clone()),
        ]);
        let b = baseline(vec![capability("t1", schema)]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.severity, DiffSeverity::Breaking);
        assert_eq!(diff.tools_removed, vec!["t2"]);
        assert_eq!(diff.action_items[0].priority, ActionPriority::Critical);
        assert_eq!(diff.migration_complexity, MigrationComplexity::Simple);
    }

    #[test]
    fn test_added_required_parameter_is_breaking() {
        // S3: adding required parameter `x` to t1 is breaking.
        let a = baseline(vec![capability(
            "t1",
            schema_with(json!({"y": {"type": "string"}}), json!(["y"])),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"y": {"type": "string"}, "x": {"type": "string"}}),
                json!(["y", "x"]),
            ),
        )]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.severity, DiffSeverity::Breaking);
        let changes = &diff.tools_modified[0].changes;
        let required_added = changes
            .iter()
            .find(|c| c.kind == ChangeKind::RequiredAdded)
            .unwrap();
        assert!(required_added.breaking);
    }

    #[test]
    fn test_relaxed_max_length_not_breaking() {
        // S4: maxLength 10 -> 20 relaxes; severity at most warning.
        let a = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string", "maxLength": 10}}), json!([])),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string", "maxLength": 20}}), json!([])),
        )]);

        let diff = diff_baselines(&a, &b);
        let change = &diff.tools_modified[0].changes[0];
        assert_eq!(change.kind, ChangeKind::ConstraintRelaxed);
        assert!(!change.breaking);
        assert!(diff.severity <= DiffSeverity::Warning);
    }

    #[test]
    fn test_tightened_minimum_is_breaking() {
        let a = baseline(vec![capability(
            "t1",
            schema_with(json!({"n": {"type": "integer", "minimum": 0}}), json!([])),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(json!({"n": {"type": "integer", "minimum": 10}}), json!([])),
        )]);

        let diff = diff_baselines(&a, &b);
        let change = &diff.tools_modified[0].changes[0];
        assert_eq!(change.kind, ChangeKind::ConstraintTightened);
        assert!(change.breaking);
        assert_eq!(diff.severity, DiffSeverity::Breaking);
    }

    #[test]
    fn test_added_constraint_tightens() {
        let a = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string"}}), json!([])),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string", "maxLength": 5}}), json!([])),
        )]);

        let diff = diff_baselines(&a, &b);
        let change = &diff.tools_modified[0].changes[0];
        assert_eq!(change.kind, ChangeKind::ConstraintAdded);
        assert!(change.breaking);
    }

    #[test]
    fn test_pattern_change_tightens() {
        let a = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string", "pattern": "^a"}}), json!([])),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(json!({"x": {"type": "string", "pattern": "^b"}}), json!([])),
        )]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(
            diff.tools_modified[0].changes[0].kind,
            ChangeKind::ConstraintTightened
        );
    }

    #[test]
    fn test_enum_membership() {
        let a = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"k": {"type": "string", "enum": ["a", "b"]}}),
                json!([]),
            ),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"k": {"type": "string", "enum": ["a", "c"]}}),
                json!([]),
            ),
        )]);

        let diff = diff_baselines(&a, &b);
        let kinds: Vec<ChangeKind> = diff.tools_modified[0]
            .changes
            .iter()
            .map(|c| c.kind)
            .collect();
        assert!(kinds.contains(&ChangeKind::EnumValueRemoved));
        assert!(kinds.contains(&ChangeKind::EnumValueAdded));
        assert_eq!(diff.severity, DiffSeverity::Breaking); // removal breaks
    }

    #[test]
    fn test_description_only_is_info() {
        let a = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"x": {"type": "string", "description": "old"}}),
                json!([]),
            ),
        )]);
        let b = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"x": {"type": "string", "description": "new"}}),
                json!([]),
            ),
        )]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.severity, DiffSeverity::Info);
        assert_eq!(
            diff.tools_modified[0].changes[0].kind,
            ChangeKind::DescriptionChanged
        );
    }

    #[test]
    fn test_added_tool_is_info() {
        let schema = schema_with(json!({}), json!([]));
        let a = baseline(vec![capability("t1", schema.clone())]);
        let b = baseline(vec![capability("t1", schema.clone()), capability("t2", schema)]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.tools_added, vec!["t2"]);
        // Pure addition never breaks
        assert!(diff.severity < DiffSeverity::Breaking);
    }

    #[test]
    fn test_severity_monotonicity() {
        // Property 5: piling on breaking changes never lowers severity.
        let base_schema = schema_with(
            json!({"a": {"type": "string"}, "b": {"type": "string"}}),
            json!([]),
        );
        let a = baseline(vec![capability("t1", base_schema.clone())]);

        // One breaking change
        let one = baseline(vec![capability(
            "t1",
            schema_with(json!({"a": {"type": "integer"}, "b": {"type": "string"}}), json!([])),
        )]);
        // Two breaking changes
        let two = baseline(vec![capability(
            "t1",
            schema_with(
                json!({"a": {"type": "integer"}, "b": {"type": "integer"}}),
                json!([]),
            ),
        )]);

        let diff_one = diff_baselines(&a, &one);
        let diff_two = diff_baselines(&a, &two);
        assert!(diff_two.severity >= diff_one.severity);
        assert!(diff_two.risk_score >= diff_one.risk_score);
    }

    #[test]
    fn test_fingerprint_divergence_warning() {
        let schema = schema_with(json!({"x": {"type": "string"}}), json!(["x"]));
        let mut old_capability = capability("t1", schema.clone());
        old_capability.response_fingerprint = Some("aaaa".to_string());
        let mut new_capability = capability("t1", schema);
        new_capability.response_fingerprint = Some("bbbb".to_string());

        let diff = diff_baselines(&baseline(vec![old_capability]), &baseline(vec![new_capability]));
        assert_eq!(diff.tools_modified.len(), 1);
        let change = &diff.tools_modified[0].changes[0];
        assert_eq!(change.kind, ChangeKind::FingerprintDivergence);
        assert!(!change.breaking);
        assert!(diff.severity < DiffSeverity::Breaking);
    }

    #[test]
    fn test_affected_workflows() {
        let schema = schema_with(json!({}), json!([]));
        let mut a = baseline(vec![
            capability("create_user", schema.clone()),
            capability("get_user", schema.clone()),
        ]);
        a.workflows = Some(vec![
            WorkflowRecord {
                name: "user lifecycle".to_string(),
                tools: vec!["create_user".to_string(), "get_user".to_string()],
                discovered: true,
            },
            WorkflowRecord {
                name: "unrelated".to_string(),
                tools: vec!["other_tool".to_string()],
                discovered: false,
            },
        ]);
        let a = a.sealed();
        let b = baseline(vec![capability("create_user", schema)]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.tools_removed, vec!["get_user"]);
        assert_eq!(diff.affected_workflows, vec!["user lifecycle"]);
    }

    #[test]
    fn test_risk_score_clamped() {
        let schema = schema_with(json!({}), json!([]));
        let tools: Vec<ToolCapability> = (0..10)
            .map(|i| capability(&format!("t{i}"), schema.clone()))
            .collect();
        let a = baseline(tools);
        let b = baseline(vec![]);

        let diff = diff_baselines(&a, &b);
        assert_eq!(diff.risk_score, 100);
        assert_eq!(diff.migration_complexity, MigrationComplexity::Complex);
    }
}
