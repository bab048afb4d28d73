//! Hashing System - SHA-256 for Artifacts and Resolutions
//!
//! Provides deterministic, reproducible hashes. Same tree in, same hex out.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::ir::PageDefinition;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Content checksum of a compiled document's IR.
pub fn compute_checksum(ir: &PageDefinition) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(ir)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Resolution fingerprint
/// fingerprint = sha256(canonical_merged_tree + ":" + layer checksums in application order)
pub fn compute_fingerprint(
    merged: &PageDefinition,
    layer_checksums: &[&str],
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(merged)?;
    let combined = format!("{}:{}", canonical, layer_checksums.join(","));
    Ok(sha256_hex(combined.as_bytes()))
}
