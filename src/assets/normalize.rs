//! Numeric normalization of raw DSL payloads.
//!
//! Design tools emit long floating-point tails; rounding every number to two decimals keeps
//! cosmetically identical trees on the same content digest.

use serde_json::{Number, Value};

/// Round to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Round every floating-point number in `value`, recursively. Integers are left untouched.
pub fn normalize_numbers(value: &mut Value) {
    match value {
        Value::Number(n) => {
            if n.is_f64() {
                if let Some(rounded) = n.as_f64().map(round2).and_then(Number::from_f64) {
                    *n = rounded;
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_numbers),
        Value::Object(map) => map.values_mut().for_each(normalize_numbers),
        Value::Null | Value::Bool(_) | Value::String(_) => {}
    }
}
