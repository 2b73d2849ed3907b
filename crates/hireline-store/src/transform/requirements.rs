//! Job requirements, which exist in two stored shapes.
//!
//! Older jobs store a flat list of requirement strings. Newer jobs store a
//! structured object. Both decode into [`JobRequirements`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use super::fields::{as_sequence, is_keyed_sequence, string_list, text};
use hireline_api::RawDocument;

/// Entries that read like an experience statement.
static EXPERIENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\d|year|experience").unwrap());

/// Normalized job requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequirements {
    pub experience: String,
    pub skills: Vec<String>,
    pub education: String,
    pub certifications: Vec<String>,
}

/// The raw requirements field, discriminated by [`is_structured_shape`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequirementsShape<'a> {
    Structured(&'a Map<String, Value>),
    Flat(&'a Value),
    Missing,
}

impl<'a> RequirementsShape<'a> {
    pub fn of(value: Option<&'a Value>) -> Self {
        match value {
            Some(value) if is_structured_shape(value) => match value {
                Value::Object(map) => Self::Structured(map),
                _ => Self::Missing,
            },
            Some(value @ (Value::Array(_) | Value::Object(_))) => Self::Flat(value),
            _ => Self::Missing,
        }
    }
}

/// True for the structured object shape. A keyed object standing in for an
/// array is the flat shape.
pub fn is_structured_shape(raw: &Value) -> bool {
    match raw {
        Value::Object(map) => !is_keyed_sequence(map),
        _ => false,
    }
}

impl JobRequirements {
    pub fn decode(raw: &RawDocument) -> Self {
        match RequirementsShape::of(raw.get("requirements")) {
            RequirementsShape::Structured(map) => {
                let doc = RawDocument::from(map.clone());
                Self {
                    experience: text(&doc, &["experience"]),
                    skills: string_list(&doc, &["skills"]),
                    education: text(&doc, &["education"]),
                    certifications: string_list(&doc, &["certifications"]),
                }
            }
            RequirementsShape::Flat(value) => {
                let entries: Vec<String> = as_sequence(value)
                    .into_iter()
                    .filter_map(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Self {
                    experience: synthesize_experience(&entries),
                    skills: entries,
                    ..Self::default()
                }
            }
            RequirementsShape::Missing => Self::default(),
        }
    }
}

/// Best-effort experience line from a flat requirement list.
pub fn synthesize_experience(entries: &[String]) -> String {
    entries
        .iter()
        .find(|entry| EXPERIENCE_RE.is_match(entry))
        .or_else(|| entries.first())
        .cloned()
        .unwrap_or_default()
}
