//! Value assignment rules.
//!
//! Decision table used whenever a value is written into a field:
//! an exact kind match is passed through, a convertible kind is converted,
//! text is parsed into numeric and boolean targets, anything else fails.

use crate::types::FieldType;
use crate::value::Value;

/// Normalize `value` for a field of kind `target`.
///
/// Returns `None` when the value cannot be assigned. NULL is always
/// accepted; the field decides whether that means "absent" or "zero".
pub fn convert(value: Value, target: FieldType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    match target {
        FieldType::Bool => to_bool(value).map(Value::Bool),
        FieldType::Int => to_int(value).map(Value::BigInt),
        FieldType::UInt => match value {
            Value::Decimal(s) | Value::Text(s) => to_uint(&s),
            other => to_int(other).filter(|v| *v >= 0).map(Value::BigInt),
        },
        FieldType::Float => to_float(value).map(Value::Double),
        FieldType::Decimal => match value {
            Value::Decimal(s) => Some(Value::Decimal(s)),
            Value::Text(s) => s.trim().parse::<f64>().ok().map(|_| Value::Decimal(s)),
            other if other.as_i64().is_some() || matches!(other, Value::Float(_) | Value::Double(_)) => {
                Some(Value::Decimal(other.to_string()))
            }
            _ => None,
        },
        FieldType::Text => to_text(value).map(Value::Text),
        FieldType::Bytes => match value {
            Value::Bytes(b) => Some(Value::Bytes(b)),
            Value::Text(s) => Some(Value::Bytes(s.into_bytes())),
            _ => None,
        },
        FieldType::Date => match value {
            Value::Date(d) => Some(Value::Date(d)),
            other => other
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Date),
        },
        FieldType::Time => match value {
            Value::Time(t) => Some(Value::Time(t)),
            other => other.as_i64().map(Value::Time),
        },
        FieldType::Timestamp => match value {
            Value::Timestamp(t) | Value::TimestampTz(t) => Some(Value::Timestamp(t)),
            other => other.as_i64().map(Value::Timestamp),
        },
        FieldType::Uuid => match value {
            Value::Uuid(u) => Some(Value::Uuid(u)),
            Value::Bytes(b) => <[u8; 16]>::try_from(b.as_slice()).ok().map(Value::Uuid),
            _ => None,
        },
        FieldType::Json => match value {
            Value::Json(j) => Some(Value::Json(j)),
            Value::Text(s) => serde_json::from_str(&s).ok().map(Value::Json),
            _ => None,
        },
        FieldType::Array => match value {
            Value::Array(items) => Some(Value::Array(items)),
            _ => None,
        },
    }
}

fn to_bool(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Some(true),
            "0" | "f" | "false" => Some(false),
            _ => None,
        },
        other => other.as_i64().and_then(|v| match v {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }),
    }
}

fn to_int(value: Value) -> Option<i64> {
    match value {
        Value::Float(v) => float_to_int(f64::from(v)),
        Value::Double(v) => float_to_int(v),
        Value::Text(s) | Value::Decimal(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

/// Unsigned values past `i64::MAX` stay decimal text.
fn to_uint(s: &str) -> Option<Value> {
    let v: u64 = s.trim().parse().ok()?;
    Some(i64::try_from(v).map_or_else(|_| Value::Decimal(v.to_string()), Value::BigInt))
}

fn float_to_int(v: f64) -> Option<i64> {
    if v.is_finite() {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

fn to_float(value: Value) -> Option<f64> {
    match value {
        Value::Text(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn to_text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) | Value::Decimal(s) => Some(s),
        Value::Bytes(b) => String::from_utf8(b).ok(),
        Value::Bool(b) => Some(b.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        other => other.as_i64().map(|v| v.to_string()),
    }
}
