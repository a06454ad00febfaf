//! Source and target value representations

use serde::Serialize;

/// A value as it comes out of a source, before type conversion.
///
/// Dump files only ever produce `Null` and `Text`; the embedded SQLite source
/// keeps the storage class of each cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    /// Raw (already unescaped) bytes of a textual field
    Text(Vec<u8>),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
}

impl SourceValue {
    pub fn text(s: impl Into<String>) -> Self {
        SourceValue::Text(s.into().into_bytes())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }

    /// Lossy textual rendering, used in warning messages
    pub fn display_lossy(&self) -> String {
        match self {
            SourceValue::Null => "NULL".to_string(),
            SourceValue::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            SourceValue::Integer(i) => i.to_string(),
            SourceValue::Real(f) => f.to_string(),
            SourceValue::Blob(b) => format!("<{} bytes>", b.len()),
        }
    }
}

/// One row in source column order
pub type SourceRow = Vec<SourceValue>;

/// A value in the target engine's typed representation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// Decimal/Numeric (stored as string for precision)
    Decimal(String),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<&Value> for rusqlite::types::Value {
    fn from(value: &Value) -> Self {
        use rusqlite::types::Value as Sql;
        match value {
            Value::Null => Sql::Null,
            Value::Bool(b) => Sql::Integer(i64::from(*b)),
            Value::Int64(i) => Sql::Integer(*i),
            Value::Float64(f) => Sql::Real(*f),
            Value::Decimal(s) | Value::String(s) => Sql::Text(s.clone()),
            Value::Bytes(b) => Sql::Blob(b.clone()),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for SourceValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SourceValue::Null,
            ValueRef::Integer(i) => SourceValue::Integer(i),
            ValueRef::Real(f) => SourceValue::Real(f),
            ValueRef::Text(s) => SourceValue::Text(s.to_vec()),
            ValueRef::Blob(b) => SourceValue::Blob(b.to_vec()),
        }
    }
}
