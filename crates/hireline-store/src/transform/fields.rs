//! Field-level coercions shared by every entity decoder.
//!
//! All helpers are total: a missing or oddly-shaped field degrades to an
//! empty default instead of an error.

use serde_json::{Map, Value};
use tracing::trace;

use hireline_api::RawDocument;

/// First non-null value among `keys`.
pub fn first<'a>(raw: &'a RawDocument, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| raw.get(key))
        .find(|value| !value.is_null())
}

/// Scalar text. Numbers and booleans are rendered; anything else is empty.
pub fn text(raw: &RawDocument, keys: &[&str]) -> String {
    first(raw, keys).and_then(scalar_text).unwrap_or_default()
}

/// Like [`text`], but an empty result is `None`.
pub fn opt_text(raw: &RawDocument, keys: &[&str]) -> Option<String> {
    first(raw, keys)
        .and_then(scalar_text)
        .filter(|s| !s.is_empty())
}

pub fn flag(raw: &RawDocument, keys: &[&str]) -> bool {
    match first(raw, keys) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

/// Non-negative integer count. Accepts numbers and numeric strings.
pub fn count(raw: &RawDocument, keys: &[&str]) -> u32 {
    let value = match first(raw, keys) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

/// View a value as an ordered sequence.
///
/// Arrays are returned as-is. Objects with integer-like keys (how the realtime
/// provider serializes some arrays) are ordered by integer key ascending,
/// followed by any remaining keys. Everything else is empty.
pub fn as_sequence(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) if is_keyed_sequence(map) => {
            let mut indexed: Vec<(u64, &Value)> = Vec::with_capacity(map.len());
            let mut rest = Vec::new();
            for (key, item) in map {
                match key.parse::<u64>() {
                    Ok(index) => indexed.push((index, item)),
                    Err(_) => rest.push(item),
                }
            }
            indexed.sort_by_key(|(index, _)| *index);
            indexed.into_iter().map(|(_, item)| item).chain(rest).collect()
        }
        Value::Null => Vec::new(),
        other => {
            trace!(value = ?other, "expected a sequence, defaulting to empty");
            Vec::new()
        }
    }
}

/// True if an object's keys look like array indices.
pub fn is_keyed_sequence(map: &Map<String, Value>) -> bool {
    map.keys().any(|key| key.parse::<u64>().is_ok())
}

/// List of identifiers or labels. Populated objects contribute their id.
pub fn string_list(raw: &RawDocument, keys: &[&str]) -> Vec<String> {
    first(raw, keys)
        .map(|value| as_sequence(value).into_iter().filter_map(list_item).collect())
        .unwrap_or_default()
}

/// Bare identifier for a relationship field that may hold an id or a
/// populated related object.
pub fn foreign_key(raw: &RawDocument, keys: &[&str]) -> Option<String> {
    first(raw, keys).and_then(reference_id)
}

/// The document's canonical id: `id`, falling back to the legacy `_id`.
pub fn canonical_id(raw: &RawDocument) -> String {
    ["id", "_id"]
        .iter()
        .filter_map(|key| raw.get(key))
        .find_map(reference_id)
        .unwrap_or_default()
}

fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("_id"))
            .and_then(|inner| match inner {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
        _ => None,
    }
}

fn list_item(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) => reference_id(value),
        other => scalar_text(other).filter(|s| !s.is_empty()),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
