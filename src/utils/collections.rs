//! Collection constructors shared across the crate.

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Empty extra map with the crate's standard hasher.
#[must_use]
pub fn new_extra_map() -> FxHashMap<String, Value> {
    FxHashMap::default()
}
