//! Deterministic JSON hashing for cache keys.
//!
//! Feeds a `serde_json::Value` into a SHA-256 digest by traversing it directly
//! instead of serializing to a string first. Object keys are sorted, so two
//! requests that differ only in key order share a cache key.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::hex::normalize_json;

/// Feeds `value` into `digest` without serialization.
///
/// # Type Discrimination
///
/// Each JSON type is prefixed with a discriminant byte to prevent collisions;
/// lengths are written as little-endian `u64`:
/// - Null: 0u8
/// - Bool: 1u8 + bool byte
/// - Number: 2u8 + subtype byte + 8 bytes
/// - String: 3u8 + length + bytes
/// - Array: 4u8 + length + each element
/// - Object: 5u8 + length + sorted (key, value) pairs
pub fn hash_json_value(value: &Value, digest: &mut Sha256) {
    match value {
        Value::Null => digest.update([0u8]),
        Value::Bool(b) => digest.update([1u8, u8::from(*b)]),
        Value::Number(n) => {
            digest.update([2u8]);
            if let Some(u) = n.as_u64() {
                digest.update([0u8]);
                digest.update(u.to_le_bytes());
            } else if let Some(i) = n.as_i64() {
                digest.update([1u8]);
                digest.update(i.to_le_bytes());
            } else if let Some(f) = n.as_f64() {
                digest.update([2u8]);
                digest.update(f.to_bits().to_le_bytes());
            }
        }
        Value::String(s) => {
            digest.update([3u8]);
            hash_str(s, digest);
        }
        Value::Array(arr) => {
            digest.update([4u8]);
            digest.update((arr.len() as u64).to_le_bytes());
            for element in arr {
                hash_json_value(element, digest);
            }
        }
        Value::Object(obj) => {
            digest.update([5u8]);
            digest.update((obj.len() as u64).to_le_bytes());

            let mut sorted_keys: Vec<&String> = obj.keys().collect();
            sorted_keys.sort_unstable();

            for key in sorted_keys {
                hash_str(key, digest);
                if let Some(value) = obj.get(key) {
                    hash_json_value(value, digest);
                }
            }
        }
    }
}

fn hash_str(s: &str, digest: &mut Sha256) {
    digest.update((s.len() as u64).to_le_bytes());
    digest.update(s.as_bytes());
}

/// Derives a cache key for a JSON request argument: the hex SHA-256 digest of
/// its normalized form.
///
/// Hex strings are lowercased before hashing.
#[must_use]
pub fn request_key(value: &Value) -> String {
    let mut digest = Sha256::new();
    hash_json_value(&normalize_json(value), &mut digest);
    hex::encode(digest.finalize())
}
