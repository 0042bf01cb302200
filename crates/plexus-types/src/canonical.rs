//! Canonical JSON rendering and content hashing.
//!
//! Every hash the engine relies on for equality witnessing (cache keys,
//! registry content hash, resume `inputs_hash`) is computed over this
//! canonical form: object keys sorted lexicographically at every level,
//! tight separators, no trailing newline. `serde_json::Value`'s own
//! `Serialize` impl already sorts map keys when the `preserve_order` feature
//! is disabled (our default), but we walk the tree explicitly so the
//! guarantee doesn't depend on that cargo feature staying off in a
//! downstream build.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort object keys, leaving arrays and scalars untouched.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Render `value` as canonical JSON: keys sorted at every level, no
/// insignificant whitespace, no trailing newline.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("Value serialization is infallible")
}

/// SHA-256 of the canonical JSON rendering of `value`, lower-hex encoded.
pub fn canonical_sha256_hex(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of raw bytes, lower-hex encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Render a bare hex digest with the `"sha256:<hex>"` prefix used whenever a
/// hash is surfaced for human or log consumption (SPEC_FULL "Supplemented
/// features" item 3). Cache keys and other machine-compared digests stay
/// bare hex, exactly as §4.D defines them; this prefix is only for display.
pub fn display_hash(hex_digest: &str) -> String {
    format!("sha256:{hex_digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_at_every_level() {
        let a = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let b = json!({"a": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn canonical_json_has_no_whitespace() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let s = canonical_json(&v);
        assert!(!s.contains(' '));
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn display_hash_prefixes_bare_hex() {
        assert_eq!(display_hash("abcd"), "sha256:abcd");
    }

    #[test]
    fn hash_stable_under_key_reordering() {
        let a = json!({"tool": "x", "version": "1", "inputs": {"a": 1, "b": 2}});
        let b = json!({"inputs": {"b": 2, "a": 1}, "version": "1", "tool": "x"});
        assert_eq!(canonical_sha256_hex(&a), canonical_sha256_hex(&b));
    }

    proptest::proptest! {
        #[test]
        fn permutation_of_top_level_keys_never_changes_hash(
            a in 0i64..1000, b in 0i64..1000, c in 0i64..1000
        ) {
            let v1 = json!({"a": a, "b": b, "c": c});
            let v2 = json!({"c": c, "a": a, "b": b});
            let v3 = json!({"b": b, "c": c, "a": a});
            prop_assert_eq!(canonical_sha256_hex(&v1), canonical_sha256_hex(&v2));
            prop_assert_eq!(canonical_sha256_hex(&v2), canonical_sha256_hex(&v3));
        }
    }
}
