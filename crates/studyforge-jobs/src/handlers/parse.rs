//! Lenient JSON extraction from model output.
//!
//! Models wrap JSON in code fences, prefix it with prose, or return a bare
//! object where a list was asked for. Each handler decides its own fallback
//! when nothing here succeeds.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid code fence regex")
});

/// Best-effort JSON value from raw model output.
pub fn extract_json(raw: &str) -> Option<JsonValue> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        return Some(value);
    }
    if let Some(inner) = CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(inner.as_str()) {
            return Some(value);
        }
    }
    // Outermost object or array embedded in prose.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<JsonValue>(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parse model output as `T`.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(extract_json(raw)?).ok()
}

/// Parse model output as a list of `T`.
///
/// Accepts a bare array, an object wrapping the array under `key` (or under
/// its only array-valued field), or a single object standing in for a
/// one-element list. Items are decoded one by one and malformed items are
/// skipped; `None` when a non-empty list yields no item at all.
pub fn parse_list<T: DeserializeOwned>(raw: &str, key: &str) -> Option<Vec<T>> {
    let value = extract_json(raw)?;
    match value {
        JsonValue::Array(items) => decode_items(items),
        JsonValue::Object(mut map) => {
            if let Some(list) = map.remove(key) {
                return match list {
                    JsonValue::Array(items) => decode_items(items),
                    _ => None,
                };
            }
            let mut arrays = map.values().filter(|v| v.is_array());
            if let (Some(JsonValue::Array(only)), None) = (arrays.next(), arrays.next()) {
                return decode_items(only.clone());
            }
            serde_json::from_value::<T>(JsonValue::Object(map))
                .ok()
                .map(|item| vec![item])
        }
        _ => None,
    }
}

fn decode_items<T: DeserializeOwned>(items: Vec<JsonValue>) -> Option<Vec<T>> {
    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if total > 0 && decoded.is_empty() {
        return None;
    }
    if decoded.len() < total {
        debug!(
            skipped = total - decoded.len(),
            kept = decoded.len(),
            "Skipped malformed list items"
        );
    }
    Some(decoded)
}
