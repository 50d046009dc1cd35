//! Canonical JSON and content-addressed keys.
//!
//! Cache keys, dedup keys and idempotency keys must be stable across
//! processes, so they hash a canonical rendering (object keys sorted,
//! no insignificant whitespace) rather than whatever serde_json emits
//! for a particular map type.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value canonically: object keys sorted, arrays in order,
/// compact separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json string rendering of a plain key never fails
                out.push_str(&Value::String((*key).clone()).to_string());
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

/// Hex-encoded SHA-256 of the given bytes.
pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Content-addressed key over namespace, schema version and canonical inputs.
///
/// Format: `sha256(namespace || '\0' || schema_version || '\0' || canonical)`.
pub fn content_key(namespace: &str, schema_version: u32, inputs: &Value) -> String {
    let canonical = canonical_json(inputs);
    let mut material =
        String::with_capacity(namespace.len() + canonical.len() + 16);
    material.push_str(namespace);
    material.push('\0');
    material.push_str(&schema_version.to_string());
    material.push('\0');
    material.push_str(&canonical);
    hex_sha256(material.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_preserves_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn canonical_nested() {
        let v = json!({"z": {"y": [true, null]}, "a": "s"});
        assert_eq!(canonical_json(&v), r#"{"a":"s","z":{"y":[true,null]}}"#);
    }

    #[test]
    fn content_key_is_stable() {
        let inputs = json!({"file": "x.ts", "line": 12});
        let k1 = content_key("review", 1, &inputs);
        let k2 = content_key("review", 1, &json!({"line": 12, "file": "x.ts"}));
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn content_key_differs_with_schema_version() {
        let inputs = json!({"x": 1});
        assert_ne!(content_key("ns", 1, &inputs), content_key("ns", 2, &inputs));
    }

    #[test]
    fn content_key_differs_with_namespace() {
        let inputs = json!({"x": 1});
        assert_ne!(content_key("a", 1, &inputs), content_key("b", 1, &inputs));
    }
}
