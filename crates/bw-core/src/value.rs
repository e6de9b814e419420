//! Column values handed out by the streaming cursor
//!
//! Records expose their fields as [`Value`]s. The set of variants covers what
//! relational bulk-load sinks accept; anything richer is the record's job to
//! flatten before it reaches a cursor.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single column value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL / absent value
    #[default]
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Text (VARCHAR, NVARCHAR, TEXT)
    String(String),
    /// Binary data (VARBINARY, BLOB); streamed in pages by `get_bytes`
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    /// Values of a collection field; only present when such a field is mapped explicitly
    Array(Vec<Value>),
}

impl Value {
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL-flavoured name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BIT",
            Self::Int8(_) => "TINYINT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INT",
            Self::Int64(_) => "BIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "FLOAT",
            Self::String(_) => "NVARCHAR",
            Self::Bytes(_) => "VARBINARY",
            Self::Date(_) => "DATE",
            Self::DateTime(_) => "DATETIME2",
            Self::DateTimeTz(_) => "DATETIMEOFFSET",
            Self::Uuid(_) => "UNIQUEIDENTIFIER",
            Self::Json(_) => "JSON",
            Self::Array(_) => "ARRAY",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(v) => Some(*v != 0),
            Self::Int16(v) => Some(*v != 0),
            Self::Int32(v) => Some(*v != 0),
            Self::Int64(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Widening integer conversion
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int8(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v) => Some(f64::from(*v)),
            Self::Float64(v) => Some(*v),
            // i64 -> f64 may round; sinks asking for floats accept that
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::DateTimeTz(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Shape of a record field as far as column mapping is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Numbers, booleans, dates, identifiers
    Scalar,
    /// Text. Strings are sequences too, but always map to a flat column.
    Text,
    /// Byte sequences, eligible for paged streaming
    Binary,
    /// Multi-valued fields. Never auto-mapped.
    Collection,
}

/// Conversion from a Rust field type into a column [`Value`]
///
/// Implemented for the primitive types, `String`, `Vec<u8>`, the `chrono`
/// date/time types, `Uuid`, JSON values and `Option`s of any of them.
pub trait ColumnValue {
    const KIND: FieldKind = FieldKind::Scalar;

    fn into_value(self) -> Value;
}

macro_rules! scalar_column_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ColumnValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self.into())
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    v.into_value()
                }
            }
        )*
    };
}

scalar_column_value! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Int16,
    u16 => Int32,
    u32 => Int64,
    f32 => Float32,
    f64 => Float64,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeTz,
    Uuid => Uuid,
    serde_json::Value => Json,
}

impl ColumnValue for String {
    const KIND: FieldKind = FieldKind::Text;

    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl ColumnValue for &str {
    const KIND: FieldKind = FieldKind::Text;

    fn into_value(self) -> Value {
        Value::String(self.to_owned())
    }
}

impl ColumnValue for Vec<u8> {
    const KIND: FieldKind = FieldKind::Binary;

    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl<V: ColumnValue> ColumnValue for Option<V> {
    const KIND: FieldKind = V::KIND;

    fn into_value(self) -> Value {
        self.map_or(Value::Null, ColumnValue::into_value)
    }
}

impl ColumnValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<V: ColumnValue> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        v.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_none_is_null() {
        let v: Option<i32> = None;
        assert!(v.into_value().is_null());
        assert_eq!(Some(5i32).into_value(), Value::Int32(5));
    }

    #[test]
    fn field_kinds_follow_the_rust_type() {
        assert_eq!(<String as ColumnValue>::KIND, FieldKind::Text);
        assert_eq!(<Option<String> as ColumnValue>::KIND, FieldKind::Text);
        assert_eq!(<Vec<u8> as ColumnValue>::KIND, FieldKind::Binary);
        assert_eq!(<i64 as ColumnValue>::KIND, FieldKind::Scalar);
    }

    #[test]
    fn display_renders_sql_friendly_text() {
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_string(), "0xDEAD");
        assert_eq!(Value::from("bob").to_string(), "bob");
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Value::Date(d).to_string(), "2024-02-29");
        assert_eq!(
            Value::Array(vec![Value::Int32(1), Value::Null]).to_string(),
            "[1, NULL]"
        );
    }

    #[test]
    fn numeric_widening() {
        assert_eq!(Value::Int8(-3).as_i64(), Some(-3));
        assert_eq!(Value::Int32(7).as_f64(), Some(7.0));
        assert_eq!(Value::from("x").as_i64(), None);
    }
}
