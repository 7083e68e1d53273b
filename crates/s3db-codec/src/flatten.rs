//! Flatten nested JSON objects into dotted paths and back (spec §4.2 item 1).

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flatten a JSON object into dotted-path scalars/arrays, e.g.
/// `{"address": {"city": "NYC"}}` -> `{"address.city": "NYC"}`.
/// Arrays are kept intact (not further flattened) — they are one
/// attribute value, not a set of indexed paths.
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            if map.is_empty() && !prefix.is_empty() {
                out.insert(prefix, Value::Object(Map::new()));
                return;
            }
            for (k, v) in map {
                let path = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten_into(v, path, out);
            }
        }
        other => {
            out.insert(prefix, other.clone());
        }
    }
}

/// Inverse of [`flatten`]: rebuild a nested JSON object from dotted paths.
#[must_use]
pub fn unflatten(fields: &BTreeMap<String, Value>) -> Value {
    let mut root = Map::new();
    for (path, value) in fields {
        let mut segments = path.split('.').peekable();
        let mut current = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), value.clone());
            } else {
                let entry = current.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                current = entry.as_object_mut().expect("just ensured object");
            }
        }
    }
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects() {
        let value = json!({"name": "Ada", "address": {"city": "NYC", "zip": "10001"}});
        let flat = flatten(&value);
        assert_eq!(flat.get("name"), Some(&json!("Ada")));
        assert_eq!(flat.get("address.city"), Some(&json!("NYC")));
        assert_eq!(flat.get("address.zip"), Some(&json!("10001")));
    }

    #[test]
    fn roundtrips_through_unflatten() {
        let value = json!({"name": "Ada", "address": {"city": "NYC"}, "tags": ["a", "b"]});
        let flat = flatten(&value);
        let back = unflatten(&flat);
        assert_eq!(back, value);
    }

    #[test]
    fn empty_nested_object_survives_roundtrip() {
        let value = json!({"meta": {}});
        let flat = flatten(&value);
        let back = unflatten(&flat);
        assert_eq!(back, value);
    }
}
