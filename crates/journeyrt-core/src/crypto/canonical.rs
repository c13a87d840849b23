//! Canonical JSON serialization.
//!
//! Signature payloads are reconstructed from parsed documents, so both
//! parties must serialize identically: object keys sorted lexicographically
//! at every nesting level, compact separators, and no escaping of forward
//! slashes. `serde_json` never escapes slashes, which matches the contract;
//! key ordering is enforced here explicitly rather than relying on map
//! implementation details.

use std::fmt::Write;

use serde_json::Value;

/// Serializes a JSON value in canonical form.
#[must_use]
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        },
        Value::String(s) => write_string(out, s),
        // Display for scalar values is already compact JSON.
        scalar => {
            let _ = write!(out, "{scalar}");
        },
    }
}

fn write_string(out: &mut String, s: &str) {
    let _ = write!(out, "{}", Value::String(s.to_string()));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keys_sorted_at_every_level() {
        let value = json!({
            "zeta": {"b": 2, "a": 1},
            "alpha": [ {"y": true, "x": false} ],
        });
        assert_eq!(
            to_canonical_string(&value),
            r#"{"alpha":[{"x":false,"y":true}],"zeta":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn forward_slashes_are_not_escaped() {
        let value = json!({"url": "https://example.com/a/b"});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"url":"https://example.com/a/b"}"#
        );
    }

    #[test]
    fn compact_separators() {
        let value = json!({"a": [1, 2.5, null, "s"], "b": true});
        assert_eq!(to_canonical_string(&value), r#"{"a":[1,2.5,null,"s"],"b":true}"#);
    }

    #[test]
    fn control_characters_escaped() {
        let value = json!({"s": "line\nbreak\t\"quoted\""});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"s":"line\nbreak\t\"quoted\""}"#
        );
    }

    #[test]
    fn canonicalization_is_idempotent_through_reparse() {
        let value = json!({"b": {"d": 1, "c": [true, {"z": 0, "a": 0}]}, "a": "x"});
        let first = to_canonical_string(&value);
        let reparsed: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(to_canonical_string(&reparsed), first);
    }
}
