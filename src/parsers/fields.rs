//! Lenient accessors over exchange JSON payloads.
//!
//! Exchanges mix string and numeric encodings for the same field, so every
//! accessor accepts both and falls back to an empty/zero value.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

pub fn string(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

pub fn optional_string(value: &Value, key: &str) -> Option<String> {
    Some(string(value, key)).filter(|s| !s.is_empty())
}

pub fn decimal(value: &Value, key: &str) -> Decimal {
    match value.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s).unwrap_or_default(),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok()))
            .unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

pub fn boolean(value: &Value, key: &str) -> Option<bool> {
    match value.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => Some(s == "true" || s == "1"),
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

/// Millisecond epoch timestamp, numeric or string-encoded
pub fn millis(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let ms = match value.get(key)? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse::<i64>().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mixed_encodings() {
        let v = json!({"p": "1.25", "q": 3, "i": 4293153, "m": true, "T": "1700000000123"});
        assert_eq!(string(&v, "i"), "4293153");
        assert_eq!(decimal(&v, "p"), Decimal::from_str("1.25").unwrap());
        assert_eq!(decimal(&v, "q"), Decimal::from(3));
        assert_eq!(boolean(&v, "m"), Some(true));
        assert_eq!(millis(&v, "T").unwrap().timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let v = json!({"N": null});
        assert_eq!(string(&v, "N"), "");
        assert_eq!(optional_string(&v, "N"), None);
        assert_eq!(decimal(&v, "missing"), Decimal::ZERO);
        assert!(millis(&v, "T").is_none());
    }
}
