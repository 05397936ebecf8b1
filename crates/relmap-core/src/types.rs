//! Field types and the scalar field contract.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Storage kind of a scalar record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    /// Signed integers of any width
    Int,
    /// Unsigned integers of any width
    UInt,
    Float,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    Uuid,
    Json,
    Array,
}

impl FieldType {
    /// Whether increments and decrements apply to this kind.
    pub const fn is_integer(self) -> bool {
        matches!(self, FieldType::Int | FieldType::UInt)
    }

    /// Whether this kind holds any number.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Int | FieldType::UInt | FieldType::Float | FieldType::Decimal
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::UInt => "uint",
            FieldType::Float => "float",
            FieldType::Decimal => "decimal",
            FieldType::Text => "text",
            FieldType::Bytes => "bytes",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Timestamp => "timestamp",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
            FieldType::Array => "array",
        }
    }
}

/// A point in time, stored as microseconds since the Unix epoch (UTC).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time truncated to whole seconds.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Timestamp(i64::try_from(secs).unwrap_or(i64::MAX / 1_000_000) * 1_000_000)
    }

    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

/// A Rust type that can back a scalar record field.
///
/// `from_value` receives a value already normalized by
/// [`convert`](crate::convert::convert) for [`Self::TYPE`], so implementations
/// only narrow it (e.g. `BigInt` into `i16`).
pub trait FieldValue: Default + Send + Sync + 'static {
    const TYPE: FieldType;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Option<Self>;

    /// Whether the current value differs from a snapshot taken earlier.
    ///
    /// Override for types whose `Value` form does not capture equality.
    fn differs(&self, snapshot: &Value) -> bool {
        !self.to_value().same(snapshot)
    }

    fn is_zero(&self) -> bool {
        self.to_value().is_zero()
    }
}

macro_rules! integer_field {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                const TYPE: FieldType = FieldType::$kind;

                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: Value) -> Option<Self> {
                    value.as_i64().and_then(|v| <$ty>::try_from(v).ok())
                }
            }
        )*
    };
}

integer_field!(
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => UInt,
    u16 => UInt,
    u32 => UInt,
);

/// Values above `i64::MAX` travel as decimal text so no bits are lost.
impl FieldValue for u64 {
    const TYPE: FieldType = FieldType::UInt;

    fn to_value(&self) -> Value {
        i64::try_from(*self).map_or_else(|_| Value::Decimal(self.to_string()), Value::BigInt)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Decimal(s) | Value::Text(s) => s.trim().parse().ok(),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }
}

impl FieldValue for bool {
    const TYPE: FieldType = FieldType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl FieldValue for f32 {
    const TYPE: FieldType = FieldType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FieldValue for f64 {
    const TYPE: FieldType = FieldType::Float;

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldValue for String {
    const TYPE: FieldType = FieldType::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }
}

impl FieldValue for Vec<u8> {
    const TYPE: FieldType = FieldType::Bytes;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl FieldValue for [u8; 16] {
    const TYPE: FieldType = FieldType::Uuid;

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Uuid(u) => Some(u),
            _ => None,
        }
    }
}

impl FieldValue for serde_json::Value {
    const TYPE: FieldType = FieldType::Json;

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }
}

impl FieldValue for Timestamp {
    const TYPE: FieldType = FieldType::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(self.0)
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_timestamp().map(Timestamp)
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const TYPE: FieldType = T::TYPE;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        if value.is_null() {
            return Some(None);
        }
        T::from_value(value).map(Some)
    }

    fn differs(&self, snapshot: &Value) -> bool {
        match self {
            Some(v) => snapshot.is_null() || v.differs(snapshot),
            None => !snapshot.is_null(),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_narrowing() {
        assert_eq!(i16::from_value(Value::BigInt(300)), Some(300));
        assert_eq!(i8::from_value(Value::BigInt(300)), None);
        assert_eq!(u32::from_value(Value::BigInt(-1)), None);
        assert_eq!(u64::from_value(Value::BigInt(9)), Some(9));
    }

    #[test]
    fn u64_above_i64_range_is_lossless() {
        let big = u64::MAX - 1;
        let value = big.to_value();
        assert_eq!(value, Value::Decimal("18446744073709551614".to_string()));
        assert_eq!(u64::from_value(value.clone()), Some(big));
        assert!(!big.differs(&value));
        assert!(big.differs(&Value::BigInt(i64::MAX)));
        assert_eq!(7_u64.to_value(), Value::BigInt(7));
    }

    #[test]
    fn option_nullability() {
        assert_eq!(Option::<i64>::from_value(Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(Value::BigInt(4)), Some(Some(4)));
        assert!(<Option<i64> as FieldValue>::NULLABLE);
        assert!(!<i64 as FieldValue>::NULLABLE);
    }

    #[test]
    fn option_zero_is_none() {
        // Some(0) is an explicit value, not an absent one.
        assert!(!FieldValue::is_zero(&Some(0_i64)));
        assert!(FieldValue::is_zero(&Option::<i64>::None));
        assert!(FieldValue::is_zero(&0_i64));
    }

    #[test]
    fn differs_against_snapshot() {
        assert!(!5_i32.differs(&Value::BigInt(5)));
        assert!(5_i32.differs(&Value::BigInt(6)));
        assert!(Some(1_i64).differs(&Value::Null));
        assert!(!Option::<String>::None.differs(&Value::Null));
    }

    #[test]
    fn timestamp_now_is_whole_seconds() {
        let now = Timestamp::now();
        assert!(now.as_micros() > 0);
        assert_eq!(now.as_micros() % 1_000_000, 0);
        assert_eq!(Timestamp::from_value(Value::TimestampTz(7)), Some(Timestamp(7)));
    }
}
