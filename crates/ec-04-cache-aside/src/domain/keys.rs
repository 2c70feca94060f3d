//! Cache key derivation.
//!
//! Entity keys are `<namespace>:<id>`. Parameterized queries hash a
//! normalized form of their parameters so that logically identical queries
//! share one key:
//!
//! ```text
//! {"limit":20,"category":"shoes","search":null}
//!     → drop nulls, sort keys → {"category":"shoes","limit":20}
//!     → sha256 → hex → product_search:5b1c…
//! ```

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const PRODUCT_NAMESPACE: &str = "product";
pub const PRODUCT_SEARCH_NAMESPACE: &str = "product_search";

pub fn entity_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Prefix matching every key in `namespace`.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}

/// Deterministic key for a parameterized query.
pub fn query_key(namespace: &str, params: &Value) -> String {
    let normalized = normalize_params(params);
    // A `Value` always serializes.
    let canonical = serde_json::to_string(&normalized).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{namespace}:{}", hex::encode(digest))
}

/// Drop null members and order object keys, recursively.
pub fn normalize_params(params: &Value) -> Value {
    match params {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut normalized = Map::new();
            for (key, value) in entries {
                normalized.insert(key.clone(), normalize_params(value));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_params).collect()),
        other => other.clone(),
    }
}
