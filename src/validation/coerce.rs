//! Coercion of raw request values (query strings, JSON bodies, path segments) into declared types.

use super::ParamType;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Coerce one raw value into `ty`. `from_query` marks values that arrived as strings
/// (query or path) and therefore need parsing rather than a type check only.
pub fn coerce(raw: Value, ty: &ParamType, from_query: bool) -> Result<Value, String> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match ty {
        ParamType::Any => Ok(raw),
        ParamType::String => match raw {
            Value::String(_) => Ok(raw),
            other if from_query => Ok(Value::String(scalar_string(&other))),
            other => Err(format!("{} is not a string", other)),
        },
        ParamType::Integer => match &raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| format!("'{}' is not a valid integer", s)),
            other => Err(format!("{} is not a valid integer", other)),
        },
        ParamType::Number => match &raw {
            Value::Number(_) => Ok(raw),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{}' is not a valid number", s)),
            other => Err(format!("{} is not a valid number", other)),
        },
        ParamType::Boolean => match &raw {
            Value::Bool(_) => Ok(raw),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a valid boolean", s)),
            },
            other => Err(format!("{} is not a valid boolean", other)),
        },
        ParamType::Date => match &raw {
            Value::String(s) => parse_date(s).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
            other => Err(format!("{} is not a valid date", other)),
        },
        ParamType::DateTime | ParamType::Timestamp => match &raw {
            Value::String(s) => parse_datetime(s).map(|d| Value::String(d.to_rfc3339())),
            Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(|d| Value::String(d.to_rfc3339()))
                .ok_or_else(|| format!("{} is not a valid timestamp", n)),
            other => Err(format!("{} is not a valid date-time", other)),
        },
        ParamType::Object | ParamType::Array | ParamType::Model { .. } => match raw {
            Value::String(s) => serde_json::from_str::<Value>(&s).map_err(|e| format!("invalid JSON: {}", e)),
            other => Ok(other),
        },
    }
}

/// Coerce a query-string value against a column type name from model metadata.
/// Unknown types and unparsable values stay strings so the store decides.
pub fn coerce_query_value(raw: &str, ty: Option<&ParamType>) -> Value {
    match ty {
        Some(ty) => coerce(Value::String(raw.to_string()), ty, true).unwrap_or_else(|_| Value::String(raw.to_string())),
        None => Value::String(raw.to_string()),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| parse_datetime(s).map(|d| d.date_naive()))
        .map_err(|_| format!("'{}' is not a valid date", s))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Ok(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("'{}' is not a valid date-time", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_strings_become_typed_values() {
        assert_eq!(coerce(json!("42"), &ParamType::Integer, true).unwrap(), json!(42));
        assert_eq!(coerce(json!("true"), &ParamType::Boolean, true).unwrap(), json!(true));
        assert_eq!(coerce(json!("1.5"), &ParamType::Number, true).unwrap(), json!(1.5));
        assert!(coerce(json!("abc"), &ParamType::Integer, true).is_err());
    }

    #[test]
    fn dates_are_normalized() {
        assert_eq!(coerce(json!("2024-02-03"), &ParamType::Date, true).unwrap(), json!("2024-02-03"));
        assert_eq!(
            coerce(json!("2024-02-03T04:05:06Z"), &ParamType::DateTime, true).unwrap(),
            json!("2024-02-03T04:05:06+00:00")
        );
        assert_eq!(
            coerce(json!(0), &ParamType::Timestamp, false).unwrap(),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert!(coerce(json!("yesterday"), &ParamType::DateTime, true).is_err());
    }

    #[test]
    fn structured_strings_are_json_parsed() {
        assert_eq!(
            coerce(json!("{\"a\":1}"), &ParamType::Object, true).unwrap(),
            json!({ "a": 1 })
        );
        assert!(coerce(json!("{oops"), &ParamType::model("Widget"), true).is_err());
    }

    #[test]
    fn null_passes_through() {
        assert_eq!(coerce(Value::Null, &ParamType::Integer, false).unwrap(), Value::Null);
    }
}
