//! Content digests shared by the path asset pipeline and DSL revision tracking.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::PathItem;

/// Compute SHA-256 of bytes, return lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Digest of one path conversion unit: `data:fill` pairs joined by `|`, in item order.
pub fn path_digest(items: &[PathItem]) -> String {
    let joined = items
        .iter()
        .map(|item| format!("{}:{}", item.data, item.fill))
        .collect::<Vec<_>>()
        .join("|");
    sha256_hex(joined.as_bytes())
}

/// Digest of a DSL payload over its canonical JSON form (sorted keys, no whitespace).
pub fn dsl_digest(dsl: &Value) -> String {
    sha256_hex(canonical_json(dsl).as_bytes())
}

/// Render a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    sort_value(value).to_string()
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}
