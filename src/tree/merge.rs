//! Untyped precedence merge.
//!
//! Used where no schema narrows the value: `Any` fields, keys a record does
//! not declare, and the `__path`/inline/`__overwrite` contributions of one
//! field. Tier merging goes through [`merge_with_schema`](super::merge_with_schema).

use serde_json::Value;

/// Merge `high` over `low`.
///
/// Mappings merge key by key. Anything else in `high` replaces `low`
/// outright, sequences included. A key missing from `high` keeps its `low`
/// value; a key present with `null` clears it.
///
/// ```
/// use layered_config::tree::deep_merge;
/// use serde_json::json;
///
/// let preset = json!({"name": "large", "layers": 24, "dropout": 0.1});
/// let patch = json!({"layers": 12, "dropout": null});
/// assert_eq!(
///     deep_merge(preset, patch),
///     json!({"name": "large", "layers": 12, "dropout": null})
/// );
/// ```
pub fn deep_merge(low: Value, high: Value) -> Value {
    match (low, high) {
        (Value::Object(mut low), Value::Object(high)) => {
            for (key, value) in high {
                let merged = match low.remove(&key) {
                    Some(previous) => deep_merge(previous, value),
                    None => value,
                };
                low.insert(key, merged);
            }
            Value::Object(low)
        }
        (_, high) => high,
    }
}
