//! Canonical content hashing for cache identities.
//!
//! Objects are walked in sorted key order and scalars are hashed through
//! their text form, so `{"a":1,"b":2}` and `{"b":2,"a":"1"}` share a hash.
//! Integral floats are written as integers, so `1` and `1.0` hash alike.
//! Every token is length-prefixed to keep distinct structures from colliding.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the canonical form of `value`.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    write_value(&mut hasher, value);
    hex::encode(hasher.finalize())
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"null;"),
        Value::Bool(flag) => write_scalar(hasher, if *flag { "true" } else { "false" }),
        Value::Number(number) => write_scalar(hasher, &number_text(number)),
        Value::String(text) => write_scalar(hasher, text),
        Value::Array(items) => {
            hasher.update(format!("array:{};", items.len()).as_bytes());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|left, right| left.0.cmp(right.0));
            hasher.update(format!("object:{};", entries.len()).as_bytes());
            for (name, item) in entries {
                write_scalar(hasher, name);
                write_value(hasher, item);
            }
        }
    }
}

fn number_text(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(float) if float == 0.0 => "0".to_string(),
        // `f64`'s Display never uses an exponent and drops a zero fraction.
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}

fn write_scalar(hasher: &mut Sha256, text: &str) {
    hasher.update(format!("scalar:{}:", text.len()).as_bytes());
    hasher.update(text.as_bytes());
}
