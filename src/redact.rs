//! Redaction filter (C2).
//!
//! Masks payload fields that may carry user content or secrets before they
//! reach the call recorder or a log line. Always operates on a deep copy —
//! the live arguments handed to a handler must never be touched.

use serde_json::{json, Value};

const SENTINEL_KEY: &str = "redacted";

fn sentinel() -> Value {
    json!({ "redacted": true })
}

/// Redact `value` (already a deep copy) according to the rules for `tool_name`.
/// Unknown tools pass through unchanged.
pub fn redact(tool_name: &str, value: Value) -> Value {
    match tool_name {
        "file_write" => mask_fields(value, &["content"]),
        "file_read" | "file_search" => mask_fields(value, &["content", "chunk_content"]),
        "memory_before_turn" | "memory_after_turn" => {
            mask_fields(value, &["current_input", "input_items", "output_items"])
        }
        _ => value,
    }
}

/// Recursively walk maps and arrays, replacing the value of any object key
/// named in `fields` with the redaction sentinel. Recurses into children
/// that are not themselves masked so nested occurrences are also covered.
fn mask_fields(value: Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if fields.contains(&k.as_str()) {
                    out.insert(k, sentinel());
                } else {
                    out.insert(k, mask_fields(v, fields));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| mask_fields(item, fields))
                .collect(),
        ),
        other => other,
    }
}

/// `true` if `value` is exactly the redaction sentinel — useful in tests and
/// for the recorder to avoid re-masking an already-masked record.
pub fn is_sentinel(value: &Value) -> bool {
    value
        .as_object()
        .map(|m| m.len() == 1 && m.get(SENTINEL_KEY) == Some(&Value::Bool(true)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_write_content_is_masked() {
        let args = json!({"project": "p", "path": "/a.txt", "content": "secret-content"});
        let redacted = redact("file_write", args.clone());
        assert!(is_sentinel(&redacted["content"]));
        assert_eq!(redacted["path"], args["path"]);
    }

    #[test]
    fn file_read_masks_content_and_chunk_content() {
        let resp = json!({"content": "a", "chunk_content": "b", "path": "/x"});
        let redacted = redact("file_read", resp);
        assert!(is_sentinel(&redacted["content"]));
        assert!(is_sentinel(&redacted["chunk_content"]));
    }

    #[test]
    fn memory_turn_masks_array_valued_fields() {
        let resp = json!({
            "current_input": "hi",
            "input_items": [{"role": "user", "text": "hi"}],
            "output_items": [{"role": "assistant", "text": "bye"}],
            "turn_id": "turn-1"
        });
        let redacted = redact("memory_after_turn", resp);
        assert!(is_sentinel(&redacted["current_input"]));
        assert!(is_sentinel(&redacted["input_items"]));
        assert!(is_sentinel(&redacted["output_items"]));
        assert_eq!(redacted["turn_id"], "turn-1");
    }

    #[test]
    fn unknown_tool_passes_through() {
        let args = json!({"query": "golang"});
        assert_eq!(redact("web_search", args.clone()), args);
    }

    #[test]
    fn redaction_is_idempotent() {
        let args = json!({"content": "secret"});
        let once = redact("file_write", args.clone());
        let twice = redact("file_write", once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn redaction_does_not_alias_the_input() {
        let args = json!({"content": "secret", "nested": {"content": "also-secret"}});
        let redacted = redact("file_write", args.clone());
        // the original value used to build `args` is untouched because we
        // operated on an owned deep copy, not a reference into the live map.
        assert_eq!(args["content"], "secret");
        assert!(is_sentinel(&redacted["content"]));
        assert!(is_sentinel(&redacted["nested"]["content"]));
    }
}
