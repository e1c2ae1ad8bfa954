//! Canonical JSON serialization: object keys sorted recursively, no
//! incidental whitespace. `serde_json::Value` preserves insertion order for
//! maps by default, which is not a safe substitute for a defined canonical
//! form — the chain's hash invariant must not depend on caller insertion
//! order.

use serde_json::Value;

pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(&Value::String((*key).clone()), out);
                out.push(b':');
                write_canonical(&map[*key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        other => {
            // Scalars already serialize deterministically.
            out.extend_from_slice(serde_json::to_string(other).unwrap_or_default().as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_output() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json_bytes(&a), canonical_json_bytes(&b));
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let v = json!({"outer": {"z": 1, "a": 2}, "list": [{"y": 1, "x": 2}]});
        let bytes = canonical_json_bytes(&v);
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains(r#""a":2,"z":1"#) || s.contains(r#""outer":{"a":2,"z":1}"#));
        assert!(s.contains(r#""x":2,"y":1"#));
    }
}
