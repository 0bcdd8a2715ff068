//! Runtime row values.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// A single column value read from a row.
///
/// Types the database can hand over natively get their own variant. Anything
/// else travels as [`Value::Text`] holding the server's textual form, and the
/// declared column type decides how that text is quoted.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL
    Null,

    /// BOOLEAN
    Bool(bool),

    /// SMALLINT, INTEGER, BIGINT
    Int(i64),

    /// REAL, DOUBLE PRECISION
    Float(f64),

    /// NUMERIC within `Decimal`'s range
    Decimal(Decimal),

    /// Textual form of any value
    Text(String),

    /// BYTEA, or the raw bytes of a binary-encoded payload
    Bytes(Vec<u8>),

    /// TIMESTAMP WITHOUT TIME ZONE
    Timestamp(NaiveDateTime),

    /// TIMESTAMP WITH TIME ZONE
    TimestampTz(DateTime<FixedOffset>),

    /// DATE
    Date(NaiveDate),

    /// TIME WITHOUT TIME ZONE
    Time(NaiveTime),

    /// TIME WITH TIME ZONE
    TimeTz(NaiveTime, FixedOffset),
}

impl Value {
    /// Returns true if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value's default textual form, as used when it is emitted unquoted
    /// or when a type falls back to quoting the raw text.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => float_text(*v),
            Value::Decimal(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
            Value::Timestamp(v) => v.to_string(),
            Value::TimestampTz(v) => v.to_string(),
            Value::Date(v) => v.to_string(),
            Value::Time(v) => v.to_string(),
            Value::TimeTz(t, off) => format!("{t}{off}"),
        }
    }
}

/// Postgres spells the non-finite floats `NaN`, `Infinity`, `-Infinity`.
fn float_text(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int(v.into())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}
