//! Small helpers shared across the crate.
//!
//! ## Hex Normalization (`hex`)
//! - Lowercases `0x`-prefixed ids, addresses and storage keys
//! - Recursive normalization of JSON request arguments before they become cache keys
//!
//! ## JSON Hashing (`json_hash`)
//! - Deterministic structural SHA-256 hashing of `serde_json::Value` with sorted object keys
//! - Used to derive cache keys for simulated calls and log filters

pub mod hex;
pub mod json_hash;

pub use hex::{normalize_hex, normalize_json, parse_hex_bytes};
pub use json_hash::{hash_json_value, request_key};
