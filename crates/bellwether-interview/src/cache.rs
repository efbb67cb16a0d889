//! Process-local response cache.
//!
//! Keyed by `(persona, tool, canonical-args)`. Hits let the scheduler skip
//! both the LLM analysis and, when safe, the tool call itself. Insertion is
//! racy under concurrency but idempotent: two workers caching the same key
//! write equivalent values.

use dashmap::DashMap;
use serde_json::Value;

use bellwether_protocol::CallToolResult;

/// Concurrent response cache, cleared at interview start.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CallToolResult>,
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key: persona, tool, and canonicalized arguments.
    fn key(persona: &str, tool: &str, args: &Value) -> String {
        format!("{persona}\u{1f}{tool}\u{1f}{}", canonical_args(args))
    }

    /// Look up a cached response.
    pub fn get(&self, persona: &str, tool: &str, args: &Value) -> Option<CallToolResult> {
        self.entries
            .get(&Self::key(persona, tool, args))
            .map(|entry| entry.clone())
    }

    /// Store a response.
    pub fn insert(&self, persona: &str, tool: &str, args: &Value, response: CallToolResult) {
        self.entries
            .insert(Self::key(persona, tool, args), response);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render args with sorted object keys so equivalent maps share a key.
fn canonical_args(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellwether_protocol::ContentBlock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn response(text: &str) -> CallToolResult {
        CallToolResult {
            content: vec![ContentBlock::text(text)],
            is_error: None,
            structured_content: None,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = ResponseCache::new();
        let args = json!({"a": 1});
        assert!(cache.get("p", "t", &args).is_none());

        cache.insert("p", "t", &args, response("cached"));
        assert_eq!(cache.get("p", "t", &args).unwrap().text(), "cached");
        // Different persona or tool misses
        assert!(cache.get("q", "t", &args).is_none());
        assert!(cache.get("p", "u", &args).is_none());
    }

    #[test]
    fn test_key_ignores_key_order() {
        let cache = ResponseCache::new();
        cache.insert("p", "t", &json!({"a": 1, "b": 2}), response("x"));
        assert!(cache.get("p", "t", &json!({"b": 2, "a": 1})).is_some());
    }

    #[test]
    fn test_nested_canonicalization() {
        let cache = ResponseCache::new();
        cache.insert(
            "p",
            "t",
            &json!({"outer": {"y": 1, "x": 2}}),
            response("x"),
        );
        assert!(cache.get("p", "t", &json!({"outer": {"x": 2, "y": 1}})).is_some());
    }

    #[test]
    fn test_clear() {
        let cache = ResponseCache::new();
        cache.insert("p", "t", &json!({}), response("x"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
