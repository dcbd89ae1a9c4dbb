// hasher.rs — SHA-256 hashing and decision fingerprints.
//
// All hashes are SHA-256, hex-encoded. Fingerprints are computed over a
// canonical JSON rendering (object keys sorted at every depth) so that two
// proposals carrying the same data in a different key order map to the same
// cache entry, independent of how serde_json orders its maps.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Deterministic cache key for a proposal evaluated against a snapshot version.
///
/// The proposal id is deliberately not part of the key: two proposals with
/// identical payload and context get the same decision.
pub fn fingerprint(
    action_payload: &Value,
    context: &BTreeMap<String, Value>,
    rule_set_version: u64,
) -> String {
    let mut canonical = String::new();
    let _ = writeln!(canonical, "v{}", rule_set_version);
    write_canonical(action_payload, &mut canonical);
    canonical.push('\n');
    canonical.push('{');
    for (i, (key, value)) in context.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        write_string(key, &mut canonical);
        canonical.push(':');
        write_canonical(value, &mut canonical);
    }
    canonical.push('}');
    hash_str(&canonical)
}

/// Render a JSON value with object keys sorted at every level.
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
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
        // Scalars already have a single JSON rendering.
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_known_value() {
        // SHA-256("") = e3b0c442...b855
        assert_eq!(
            hash_str(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_is_hex_encoded_sha256() {
        let hash = hash_str("test");
        assert_eq!(hash.len(), 64);
        assert!(hash
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = json!({"type": "transfer", "amount": 50000, "meta": {"x": 1, "y": 2}});
        let b = json!({"meta": {"y": 2, "x": 1}, "amount": 50000, "type": "transfer"});
        let ctx = BTreeMap::new();
        assert_eq!(fingerprint(&a, &ctx, 3), fingerprint(&b, &ctx, 3));
    }

    #[test]
    fn fingerprint_changes_with_version() {
        let payload = json!({"type": "transfer"});
        let ctx = BTreeMap::new();
        assert_ne!(fingerprint(&payload, &ctx, 3), fingerprint(&payload, &ctx, 4));
    }

    #[test]
    fn fingerprint_changes_with_context() {
        let payload = json!({"type": "transfer"});
        let mut ctx = BTreeMap::new();
        let without = fingerprint(&payload, &ctx, 1);
        ctx.insert("region".to_string(), json!("eu"));
        assert_ne!(without, fingerprint(&payload, &ctx, 1));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let value = json!({"b": [ {"d": 1, "c": 2} ], "a": null});
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":[{"c":2,"d":1}]}"#);
    }
}
