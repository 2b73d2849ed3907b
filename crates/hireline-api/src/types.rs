//! Raw document and response envelope types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ApiError;

/// A loosely-typed document as delivered by either backend.
///
/// No field is guaranteed to exist or to carry any particular shape; the
/// store crate decodes these into typed entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDocument(Map<String, Value>);

impl RawDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value. Non-object values produce an empty document.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    /// Get a field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the field is present (even if null).
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a field, returning the document for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Borrow the underlying map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for RawDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Value> for RawDocument {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// Response envelope used by every pull API endpoint: `{ "data": ... }`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Unwrap a list response.
    ///
    /// Accepts both `{ data: [...] }` and `{ data: { <collection>: [...] } }`.
    pub fn into_list(self, collection: &str) -> Result<Vec<RawDocument>, ApiError> {
        let items = match self.data {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove(collection) {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(ApiError::InvalidResponse(format!(
                        "expected array under data.{}, got {}",
                        collection,
                        json_kind(&other)
                    )));
                }
                None => {
                    return Err(ApiError::InvalidResponse(format!(
                        "list envelope has neither an array nor data.{}",
                        collection
                    )));
                }
            },
            other => {
                return Err(ApiError::InvalidResponse(format!(
                    "expected list envelope, got {}",
                    json_kind(&other)
                )));
            }
        };

        Ok(items.into_iter().map(RawDocument::from_value).collect())
    }

    /// Unwrap a single-record response.
    ///
    /// Accepts `{ data: {...} }` and the nested `{ data: { <singular>: {...} } }`
    /// form some endpoints return for mutations.
    pub fn into_record(self, singular: &str) -> Result<RawDocument, ApiError> {
        match self.data {
            Value::Object(mut map) => {
                if let Some(Value::Object(_)) = map.get(singular)
                    && let Some(Value::Object(inner)) = map.remove(singular)
                {
                    return Ok(RawDocument::from(inner));
                }
                Ok(RawDocument::from(map))
            }
            other => Err(ApiError::InvalidResponse(format!(
                "expected record envelope, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
