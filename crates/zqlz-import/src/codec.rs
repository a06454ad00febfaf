//! Typed value codec
//!
//! Converts raw source values into the target's typed representation according
//! to the column's mapped [`TargetKind`]. Conversion never fails: a value that
//! does not parse as its column's kind is kept as text and reported back to the
//! caller as a [`ConversionIssue`].

use crate::type_mapping::TargetKind;
use crate::value::{SourceValue, Value};

/// A value that could not be converted to its column's kind
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionIssue {
    pub column_index: usize,
    pub kind: TargetKind,
    pub raw: String,
}

/// Convert one source value for a column of the given kind.
///
/// Returns the converted value and, on fallback, the issue describing it.
pub fn convert_value(
    value: SourceValue,
    kind: TargetKind,
    column_index: usize,
) -> (Value, Option<ConversionIssue>) {
    let fallback = |raw: String| {
        let issue = ConversionIssue {
            column_index,
            kind,
            raw: raw.clone(),
        };
        (Value::String(raw), Some(issue))
    };

    match (value, kind) {
        (SourceValue::Null, _) => (Value::Null, None),

        (SourceValue::Blob(bytes), TargetKind::Binary) => (Value::Bytes(bytes), None),
        (SourceValue::Text(bytes), TargetKind::Binary) => (Value::Bytes(bytes), None),
        (SourceValue::Blob(bytes), _) => match String::from_utf8(bytes) {
            Ok(s) => convert_text(s, kind, column_index),
            Err(e) => (Value::Bytes(e.into_bytes()), None),
        },

        (SourceValue::Text(bytes), _) => match String::from_utf8(bytes) {
            Ok(s) => convert_text(s, kind, column_index),
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                fallback(lossy)
            }
        },

        (SourceValue::Integer(i), TargetKind::Integer) => (Value::Int64(i), None),
        (SourceValue::Integer(i), TargetKind::Float) => (Value::Float64(i as f64), None),
        (SourceValue::Integer(i), TargetKind::Boolean) => match i {
            0 => (Value::Bool(false), None),
            1 => (Value::Bool(true), None),
            other => fallback(other.to_string()),
        },
        (SourceValue::Integer(i), TargetKind::Decimal) => (Value::Decimal(i.to_string()), None),
        (SourceValue::Integer(i), TargetKind::Text | TargetKind::Binary) => {
            (Value::String(i.to_string()), None)
        }

        (SourceValue::Real(f), TargetKind::Float) => (Value::Float64(f), None),
        (SourceValue::Real(f), TargetKind::Integer) => {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                (Value::Int64(f as i64), None)
            } else {
                fallback(f.to_string())
            }
        }
        (SourceValue::Real(f), TargetKind::Decimal) => (Value::Decimal(f.to_string()), None),
        (SourceValue::Real(f), TargetKind::Boolean) => fallback(f.to_string()),
        (SourceValue::Real(f), TargetKind::Text | TargetKind::Binary) => {
            (Value::String(f.to_string()), None)
        }
    }
}

fn convert_text(s: String, kind: TargetKind, column_index: usize) -> (Value, Option<ConversionIssue>) {
    let parsed = match kind {
        TargetKind::Text | TargetKind::Binary => return (Value::String(s), None),
        TargetKind::Boolean => parse_bool(&s).map(Value::Bool),
        TargetKind::Integer => s.trim().parse::<i64>().ok().map(Value::Int64),
        TargetKind::Float => s.trim().parse::<f64>().ok().map(Value::Float64),
        TargetKind::Decimal => is_decimal_literal(s.trim()).then(|| Value::Decimal(s.trim().to_string())),
    };

    match parsed {
        Some(value) => (value, None),
        None => {
            let issue = ConversionIssue {
                column_index,
                kind,
                raw: s.clone(),
            };
            (Value::String(s), Some(issue))
        }
    }
}

/// Parse the fixed boolean token set (case-insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// `[+-]digits[.digits][e[+-]digits]`, at least one digit in the mantissa
fn is_decimal_literal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits += 1;
        }
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
    }
    i == bytes.len()
}

/// Per-table converter that remembers whether a fallback was already reported
#[derive(Debug)]
pub struct ValueCodec {
    kinds: Vec<TargetKind>,
    fallbacks: u64,
    reported: bool,
}

impl ValueCodec {
    pub fn new(kinds: Vec<TargetKind>) -> Self {
        Self {
            kinds,
            fallbacks: 0,
            reported: false,
        }
    }

    /// Convert a row positionally. Missing trailing fields become NULL, extra
    /// fields are dropped.
    ///
    /// The returned issue is `Some` only for the first fallback in this table.
    pub fn convert_row(&mut self, row: Vec<SourceValue>) -> (Vec<Value>, Option<ConversionIssue>) {
        let mut out = Vec::with_capacity(self.kinds.len());
        let mut first_issue = None;
        let mut fields = row.into_iter();

        for (idx, kind) in self.kinds.iter().enumerate() {
            let raw = fields.next().unwrap_or(SourceValue::Null);
            let (value, issue) = convert_value(raw, *kind, idx);
            if let Some(issue) = issue {
                self.fallbacks += 1;
                if !self.reported {
                    self.reported = true;
                    first_issue = Some(issue);
                }
            }
            out.push(value);
        }

        (out, first_issue)
    }

    /// Total values kept as text because they did not parse
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_null_for_every_kind() {
        for kind in [
            TargetKind::Boolean,
            TargetKind::Integer,
            TargetKind::Float,
            TargetKind::Text,
            TargetKind::Decimal,
            TargetKind::Binary,
        ] {
            let (value, issue) = convert_value(SourceValue::Null, kind, 0);
            assert_eq!(value, Value::Null);
            assert!(issue.is_none());
        }
    }

    #[test]
    fn test_text_parsing_by_kind() {
        let (v, _) = convert_value(SourceValue::text("42"), TargetKind::Integer, 0);
        assert_eq!(v, Value::Int64(42));
        let (v, _) = convert_value(SourceValue::text("-1.5e3"), TargetKind::Float, 0);
        assert_eq!(v, Value::Float64(-1500.0));
        let (v, _) = convert_value(SourceValue::text("Yes"), TargetKind::Boolean, 0);
        assert_eq!(v, Value::Bool(true));
        let (v, _) = convert_value(SourceValue::text("0012.50"), TargetKind::Decimal, 0);
        assert_eq!(v, Value::Decimal("0012.50".into()));
    }

    #[test]
    fn test_parse_failure_keeps_text() {
        let (v, issue) = convert_value(SourceValue::text("12,5"), TargetKind::Float, 3);
        assert_eq!(v, Value::String("12,5".into()));
        let issue = issue.unwrap();
        assert_eq!(issue.column_index, 3);
        assert_eq!(issue.kind, TargetKind::Float);
    }

    #[test]
    fn test_sqlite_storage_classes() {
        let (v, _) = convert_value(SourceValue::Integer(1), TargetKind::Boolean, 0);
        assert_eq!(v, Value::Bool(true));
        let (v, _) = convert_value(SourceValue::Real(3.0), TargetKind::Integer, 0);
        assert_eq!(v, Value::Int64(3));
        let (v, issue) = convert_value(SourceValue::Real(3.25), TargetKind::Integer, 0);
        assert_eq!(v, Value::String("3.25".into()));
        assert!(issue.is_some());
        let (v, _) = convert_value(SourceValue::Blob(vec![0, 159]), TargetKind::Binary, 0);
        assert_eq!(v, Value::Bytes(vec![0, 159]));
    }

    #[test]
    fn test_decimal_literal_shapes() {
        assert!(is_decimal_literal("1"));
        assert!(is_decimal_literal("-0.5"));
        assert!(is_decimal_literal(".5"));
        assert!(is_decimal_literal("1e10"));
        assert!(!is_decimal_literal("1e"));
        assert!(!is_decimal_literal("."));
        assert!(!is_decimal_literal("12a"));
        assert!(!is_decimal_literal(""));
    }

    #[test]
    fn test_codec_reports_first_issue_only() {
        let mut codec = ValueCodec::new(vec![TargetKind::Integer, TargetKind::Text]);

        let (row, issue) = codec.convert_row(vec![SourceValue::text("x"), SourceValue::text("a")]);
        assert_eq!(row[0], Value::String("x".into()));
        assert!(issue.is_some());

        let (_, issue) = codec.convert_row(vec![SourceValue::text("y"), SourceValue::text("b")]);
        assert!(issue.is_none());
        assert_eq!(codec.fallbacks(), 2);
    }

    #[test]
    fn test_codec_pads_and_truncates() {
        let mut codec = ValueCodec::new(vec![TargetKind::Integer, TargetKind::Text]);
        let (row, _) = codec.convert_row(vec![SourceValue::text("1")]);
        assert_eq!(row, vec![Value::Int64(1), Value::Null]);

        let (row, _) = codec.convert_row(vec![
            SourceValue::text("1"),
            SourceValue::text("a"),
            SourceValue::text("extra"),
        ]);
        assert_eq!(row.len(), 2);
    }
}
