//! Robust JSON extraction from model output.
//!
//! Models asked for JSON routinely wrap it in fenced code blocks, prepend
//! prose, or append commentary. This parser strips fences, then falls back
//! to scanning for the first balanced JSON object or array in the text.

use serde::de::DeserializeOwned;

use crate::core::{LlmError, LlmResult};

/// Parse a typed value out of model output.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> LlmResult<T> {
    let candidate = extract_json(text).ok_or_else(|| LlmError::Parse {
        message: format!("no JSON found in output: {}", preview(text)),
    })?;
    serde_json::from_str(&candidate).map_err(|e| LlmError::Parse {
        message: format!("invalid JSON in output: {e}"),
    })
}

/// Pull the most plausible JSON payload out of free-form text.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();

    // Direct parse covers the well-behaved case
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    // Fenced code block, with or without a language tag
    if let Some(inner) = extract_fenced_block(trimmed)
        && serde_json::from_str::<serde_json::Value>(&inner).is_ok()
    {
        return Some(inner);
    }

    // First balanced object or array, tolerating trailing prose
    extract_balanced(trimmed)
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the language tag up to the end of the line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

/// Scan for the first `{`/`[` and return the balanced span, if any.
fn extract_balanced(text: &str) -> Option<String> {
    let open_pos = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[open_pos];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[open_pos..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[open_pos..=open_pos + offset];
                    if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                        return Some(candidate.to_string());
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() > 80 {
        let cut = trimmed
            .char_indices()
            .nth(80)
            .map_or(trimmed.len(), |(i, _)| i);
        format!("{}...", &trimmed[..cut])
    } else {
        trimmed.to_string()
    }
}
