//! Date normalization.
//!
//! Date-bearing fields arrive in several shapes depending on which backend
//! produced the document and how old the record is. Every shape resolves to
//! either a concrete `DateTime<Utc>` or `None`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::trace;

use hireline_api::RawDocument;

use super::fields::first;

/// Naive formats accepted after RFC 3339 and RFC 2822 fail. Interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// The shapes a date-bearing field can arrive in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateInput<'a> {
    /// Provider timestamp object: `{seconds, nanoseconds}` or `{_seconds, _nanoseconds}`.
    Timestamp { seconds: i64, nanos: u32 },
    /// Native date wrapper: `{"$date": <string | number>}`.
    Native(&'a Value),
    /// ISO 8601 / RFC 2822 / naive date string.
    Text(&'a str),
    /// Milliseconds since the Unix epoch.
    EpochMillis(f64),
    /// Absent, null, or an unrecognized shape.
    Missing,
}

/// Decide which shape a raw value has.
pub fn classify(value: Option<&Value>) -> DateInput<'_> {
    match value {
        None | Some(Value::Null) => DateInput::Missing,
        Some(Value::String(s)) => DateInput::Text(s),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(DateInput::EpochMillis)
            .unwrap_or(DateInput::Missing),
        Some(Value::Object(map)) => {
            if let Some(inner) = map.get("$date") {
                return DateInput::Native(inner);
            }
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"));
            let nanos = map.get("nanoseconds").or_else(|| map.get("_nanoseconds"));
            match seconds.and_then(as_i64) {
                Some(seconds) => DateInput::Timestamp {
                    seconds,
                    nanos: nanos
                        .and_then(as_i64)
                        .and_then(|n| u32::try_from(n).ok())
                        .unwrap_or(0),
                },
                None => DateInput::Missing,
            }
        }
        Some(_) => DateInput::Missing,
    }
}

/// Decode a raw value into a point in time, or `None` if it holds no usable date.
pub fn decode_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let decoded = match classify(value) {
        DateInput::Timestamp { seconds, nanos } => DateTime::from_timestamp(seconds, nanos),
        DateInput::Native(inner) => match inner {
            Value::String(s) => parse_text(s),
            Value::Number(n) => n.as_f64().and_then(from_millis),
            _ => None,
        },
        DateInput::Text(s) => parse_text(s),
        DateInput::EpochMillis(ms) => from_millis(ms),
        DateInput::Missing => None,
    };

    match decoded {
        Some(dt) if in_range(&dt) => Some(dt),
        Some(dt) => {
            trace!(date = %dt, "date outside supported range, treating as missing");
            None
        }
        None => {
            if value.is_some_and(|v| !v.is_null()) {
                trace!(value = ?value, "unparsable date, treating as missing");
            }
            None
        }
    }
}

/// Decode the first present date field among `keys`.
pub fn date_field(raw: &RawDocument, keys: &[&str]) -> Option<DateTime<Utc>> {
    decode_date(first(raw, keys))
}

fn parse_text(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn from_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(ms.trunc() as i64)
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

/// Dates must survive an RFC 3339 round trip.
fn in_range(dt: &DateTime<Utc>) -> bool {
    (1..=9999).contains(&dt.year())
}
