//! Lenient field extraction from transport payloads.
//!
//! Front ends hand the pipeline raw JSON payloads whose shape the core does
//! not control. [`extract_fields`] pulls a fixed set of named fields out of
//! such a payload without ever failing: absent fields (and non-object
//! payloads) yield `Value::Null`, so callers branch on value presence
//! instead of error handling.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Extracts `names` from `payload`, mapping each name to its value.
///
/// Every requested name is present in the result; a field the payload does
/// not carry maps to `Value::Null`. A payload that is not a JSON object
/// yields `Null` for every name. This function never errors.
#[must_use]
pub fn extract_fields(payload: &Value, names: &[&str]) -> FxHashMap<String, Value> {
    let mut out = FxHashMap::default();
    for name in names {
        let value = payload
            .as_object()
            .and_then(|obj| obj.get(*name))
            .cloned()
            .unwrap_or(Value::Null);
        out.insert((*name).to_string(), value);
    }
    out
}
