//! Settings merge logic
//!
//! Layers (builtin, host, workspace, CLI) are merged as JSON values:
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Merge `overlay` on top of `base`.
///
/// Tables recurse key by key. Arrays and scalars from the overlay replace
/// whatever the base had, including with `null`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut merged), Value::Object(upper)) => {
            for (key, upper_value) in upper {
                let value = match merged.remove(&key) {
                    Some(lower_value) => deep_merge(lower_value, upper_value),
                    None => upper_value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        // Device name lists and fragment lists are replaced, never concatenated
        (_, upper) => upper,
    }
}

/// Fold layers lowest-precedence first
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
