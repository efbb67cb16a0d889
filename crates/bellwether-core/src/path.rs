//! Dotted-path resolution over JSON values.
//!
//! Scenario assertions and workflow argument mappings address response
//! fields with dotted paths like `result.items.0.id`. Resolution only ever
//! walks own object keys and array indices; there is no fallthrough to any
//! other lookup, and descent depth is capped so adversarial inputs cannot
//! recurse unboundedly.

use serde_json::Value;

/// Maximum number of path segments walked before giving up.
const MAX_PATH_DEPTH: usize = 64;

/// Resolve a dotted path against a JSON value.
///
/// Segments are separated by `.`; a segment that parses as `usize` indexes
/// into arrays. Returns `None` for empty paths, missing keys, out-of-range
/// indices, type mismatches, or paths deeper than the descent cap.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for (depth, segment) in path.split('.').enumerate() {
        if depth >= MAX_PATH_DEPTH {
            return None;
        }
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Name of a JSON value's type, with `null` as a first-class type.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_nested_object() {
        let value = json!({"result": {"user": {"id": "123"}}});
        assert_eq!(
            resolve_path(&value, "result.user.id"),
            Some(&json!("123"))
        );
    }

    #[test]
    fn test_resolve_array_index() {
        let value = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(resolve_path(&value, "items.1.name"), Some(&json!("b")));
        assert_eq!(resolve_path(&value, "items.2.name"), None);
    }

    #[test]
    fn test_empty_path_is_undefined() {
        let value = json!({"a": 1});
        assert_eq!(resolve_path(&value, ""), None);
    }

    #[test]
    fn test_missing_key() {
        let value = json!({"a": 1});
        assert_eq!(resolve_path(&value, "b"), None);
        assert_eq!(resolve_path(&value, "a.b"), None);
    }

    #[test]
    fn test_null_is_resolvable() {
        let value = json!({"a": null});
        assert_eq!(resolve_path(&value, "a"), Some(&Value::Null));
    }

    #[test]
    fn test_double_dot_is_rejected() {
        let value = json!({"a": {"b": 1}});
        assert_eq!(resolve_path(&value, "a..b"), None);
    }

    #[test]
    fn test_depth_cap() {
        let mut value = json!(1);
        for _ in 0..100 {
            value = json!({ "n": value });
        }
        let deep_path = vec!["n"; 100].join(".");
        assert_eq!(resolve_path(&value, &deep_path), None);

        let shallow_path = vec!["n"; 10].join(".");
        assert!(resolve_path(&value, &shallow_path).is_some());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(value_type_name(&json!(null)), "null");
        assert_eq!(value_type_name(&json!(true)), "boolean");
        assert_eq!(value_type_name(&json!(1.5)), "number");
        assert_eq!(value_type_name(&json!("s")), "string");
        assert_eq!(value_type_name(&json!([])), "array");
        assert_eq!(value_type_name(&json!({})), "object");
    }
}
