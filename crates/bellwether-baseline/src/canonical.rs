//! Canonical JSON encoding for deterministic hashing.
//!
//! Rules:
//! - Object keys emit in Unicode code-point order.
//! - `required` and `enum` arrays are unordered sets and sort for hashing;
//!   every other array preserves declared order.
//! - Integers and equivalent floats collapse (`1` and `1.0` hash alike);
//!   floats format with their shortest round-trip representation.
//! - Strings normalize to NFC before hashing.
//! - Unknown keys pass through unchanged.
//! - Descent depth is capped; anything deeper collapses to a stable marker
//!   instead of crashing.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth before the stable marker replaces the subtree.
const MAX_DEPTH: usize = 128;

/// Marker substituted for subtrees beyond the depth cap.
const DEPTH_MARKER: &str = "__bellwether_depth_exceeded__";

/// Array keys treated as unordered sets.
const SET_KEYS: &[&str] = &["required", "enum"];

/// Canonicalize a JSON value.
///
/// Idempotent: `canonicalize(canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(value: &Value) -> Value {
    canonicalize_inner(value, None, 0)
}

fn canonicalize_inner(value: &Value, parent_key: Option<&str>, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(DEPTH_MARKER.to_string());
    }
    match value {
        Value::Null | Value::Bool(_) => value.clone(),
        Value::Number(number) => Value::Number(canonical_number(number)),
        Value::String(text) => Value::String(text.nfc().collect()),
        Value::Array(items) => {
            let mut canonical: Vec<Value> = items
                .iter()
                .map(|item| canonicalize_inner(item, None, depth + 1))
                .collect();
            // Set semantics only where the schema vocabulary says so;
            // semantic-order arrays (tool lists, workflow steps) keep their
            // declared order.
            if parent_key.is_some_and(|key| SET_KEYS.contains(&key)) {
                canonical.sort_by(|a, b| canonical_string(a).cmp(&canonical_string(b)));
            }
            Value::Array(canonical)
        }
        Value::Object(map) => {
            let mut canonical = Map::with_capacity(map.len());
            // serde_json's Map preserves insertion order; insert in sorted
            // key order so serialization is canonical too.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                let normalized_key: String = key.nfc().collect();
                canonical.insert(
                    normalized_key,
                    canonicalize_inner(&map[key], Some(key.as_str()), depth + 1),
                );
            }
            Value::Object(canonical)
        }
    }
}

/// Collapse floats with no fractional part into integers.
fn canonical_number(number: &Number) -> Number {
    if number.is_i64() || number.is_u64() {
        return number.clone();
    }
    if let Some(float) = number.as_f64() {
        if float.fract() == 0.0
            && float >= i64::MIN as f64
            && float <= i64::MAX as f64
        {
            return Number::from(float as i64);
        }
        if let Some(normalized) = Number::from_f64(float) {
            return normalized;
        }
    }
    number.clone()
}

/// Render a canonicalized value as its canonical JSON string.
///
/// Keys are emitted in code-point order; floats use Rust's shortest
/// round-trip formatting.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&canonicalize(value), &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(number) => {
            if let Some(i) = number.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = number.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = number.as_f64() {
                // `{}` on f64 is the shortest representation that
                // round-trips.
                out.push_str(&format!("{f}"));
            }
        }
        Value::String(text) => {
            out.push_str(&serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string()));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_else(|_| "\"\"".to_string()));
                out.push(':');
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

/// Full SHA-256 of the canonical encoding, as lowercase hex.
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_string(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 16 hex characters of the canonical hash.
pub fn short_hash(value: &Value) -> String {
    canonical_hash(value)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_order_ignored() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
        assert_eq!(canonical_string(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_required_and_enum_sort_as_sets() {
        let a = json!({"required": ["b", "a"], "enum": [3, 1, 2]});
        let b = json!({"required": ["a", "b"], "enum": [1, 2, 3]});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_semantic_arrays_keep_order() {
        let a = json!({"steps": ["create", "update"]});
        let b = json!({"steps": ["update", "create"]});
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_integer_float_collapse() {
        let a = json!({"minimum": 1});
        let b = json!({"minimum": 1.0});
        assert_eq!(canonical_string(&a), canonical_string(&b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_float_shortest_round_trip() {
        let value = json!({"x": 0.1});
        assert_eq!(canonical_string(&value), r#"{"x":0.1}"#);
        let value = json!({"x": 1.5});
        assert_eq!(canonical_string(&value), r#"{"x":1.5}"#);
    }

    #[test]
    fn test_nfc_normalization() {
        // U+00E9 (precomposed) vs U+0065 U+0301 (decomposed)
        let precomposed = json!({"name": "caf\u{00e9}"});
        let decomposed = json!({"name": "cafe\u{0301}"});
        assert_eq!(canonical_hash(&precomposed), canonical_hash(&decomposed));
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let value = json!({"x-vendor": {"custom": true}, "type": "object"});
        let canonical = canonicalize(&value);
        assert_eq!(canonical["x-vendor"], json!({"custom": true}));
    }

    #[test]
    fn test_depth_cap_yields_marker() {
        let mut value = json!("leaf");
        for _ in 0..200 {
            value = json!({ "n": value });
        }
        let canonical = canonicalize(&value);
        // Never crashes; deep subtree collapsed to the marker
        assert!(canonical_string(&canonical).contains(DEPTH_MARKER));
        // And remains idempotent
        assert_eq!(canonicalize(&canonical), canonical);
    }

    #[test]
    fn test_nested_set_sorting() {
        let a = json!({
            "properties": {
                "kind": {"type": "string", "enum": ["z", "a", "m"]}
            },
            "required": ["b", "a"]
        });
        let b = json!({
            "required": ["a", "b"],
            "properties": {
                "kind": {"enum": ["a", "m", "z"], "type": "string"}
            }
        });
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    // Strategy for arbitrary JSON values of bounded depth.
    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|i| json!(i)),
            (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
            "[a-zA-Z0-9_é]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6).prop_map(|entries| {
                    Value::Object(entries.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_canonicalize_idempotent(value in arb_json()) {
            let once = canonicalize(&value);
            let twice = canonicalize(&once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_hash_deterministic(value in arb_json()) {
            prop_assert_eq!(canonical_hash(&value), canonical_hash(&value));
        }

        #[test]
        fn prop_key_order_independence(
            entries in prop::collection::vec(("[a-z]{1,6}", any::<i32>()), 1..8)
        ) {
            let forward: Map<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let reversed: Map<String, Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            prop_assert_eq!(
                canonical_hash(&Value::Object(forward)),
                canonical_hash(&Value::Object(reversed))
            );
        }
    }
}
