use serde_json::Value;

/// Lowercases a `0x`-prefixed hex string; any other string is returned as is.
///
/// Equivalent ids and addresses written with different casing collapse to
/// one cache key.
#[must_use]
pub fn normalize_hex(value: &str) -> String {
    if value.starts_with("0x") || value.starts_with("0X") {
        value.to_ascii_lowercase()
    } else {
        value.to_string()
    }
}

/// Recursively applies [`normalize_hex`] to every string inside `value`.
#[must_use]
pub fn normalize_json(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_hex(s)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize_json(v))).collect())
        }
        other => other.clone(),
    }
}

/// Parses a hex string to bytes.
///
/// Accepts strings with or without "0x" prefix. Returns `None` if invalid hex or odd length.
#[must_use]
pub fn parse_hex_bytes(hex: &str) -> Option<Vec<u8>> {
    let hex_str = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(hex);
    hex::decode(hex_str).ok()
}
