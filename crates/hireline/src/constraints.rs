//! Command-line query constraint parsing.

use hireline_api::{Constraint, Direction};
use serde_json::Value;

/// Parse `field=value` (equality) or `field~value` (array contains).
///
/// Values that parse as JSON scalars (numbers, booleans, null) keep their
/// type; anything else is a string.
pub fn parse_where(raw: &str) -> Result<Constraint, String> {
    let (field, value, contains) = match raw.split_once('=') {
        Some((field, value)) => (field, value, false),
        None => match raw.split_once('~') {
            Some((field, value)) => (field, value, true),
            None => return Err(format!("expected field=value or field~value, got '{}'", raw)),
        },
    };

    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }

    let value = scalar(value.trim());
    Ok(if contains {
        Constraint::array_contains(field, value)
    } else {
        Constraint::equals(field, value)
    })
}

/// Parse `field`, `field:asc` or `field:desc`.
pub fn parse_order_by(raw: &str) -> Result<Constraint, String> {
    let (field, direction) = match raw.rsplit_once(':') {
        Some((field, dir)) => {
            let direction = match dir.to_ascii_lowercase().as_str() {
                "asc" => Direction::Asc,
                "desc" => Direction::Desc,
                other => return Err(format!("unknown sort direction '{}'", other)),
            };
            (field, direction)
        }
        None => (raw, Direction::Asc),
    };

    let field = field.trim();
    if field.is_empty() {
        return Err("missing field name in --order-by".to_string());
    }
    Ok(Constraint::order_by(field, direction))
}

fn scalar(value: &str) -> Value {
    match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => parsed,
        _ => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("status=open", Constraint::equals("status", "open"); "string")]
    #[test_case("openings=3", Constraint::equals("openings", 3); "number")]
    #[test_case("read=false", Constraint::equals("read", false); "boolean")]
    #[test_case("tags~rust", Constraint::array_contains("tags", "rust"); "contains")]
    #[test_case(" clientId = c1 ", Constraint::equals("clientId", "c1"); "trimmed")]
    #[test_case("note=a=b", Constraint::equals("note", "a=b"); "first equals splits")]
    fn test_parse_where(raw: &str, expected: Constraint) {
        assert_eq!(parse_where(raw).unwrap(), expected);
    }

    #[test_case("status"; "no operator")]
    #[test_case("=open"; "no field")]
    fn test_parse_where_rejects(raw: &str) {
        assert!(parse_where(raw).is_err());
    }

    #[test_case("createdAt", Constraint::order_by("createdAt", Direction::Asc); "default ascending")]
    #[test_case("createdAt:desc", Constraint::order_by("createdAt", Direction::Desc); "descending")]
    #[test_case("createdAt:ASC", Constraint::order_by("createdAt", Direction::Asc); "case insensitive")]
    fn test_parse_order_by(raw: &str, expected: Constraint) {
        assert_eq!(parse_order_by(raw).unwrap(), expected);
    }

    #[test]
    fn test_parse_order_by_rejects_unknown_direction() {
        assert!(parse_order_by("createdAt:sideways").is_err());
        assert!(parse_order_by(":desc").is_err());
    }
}
