//! Delimited row decoder
//!
//! Splits one line of delimited text into fields and reverses the backslash
//! style escaping used by `mysqlsh util.dumpInstance` data files and by
//! PostgreSQL `COPY ... TO stdout` text format.

use crate::value::{SourceRow, SourceValue};

/// Field delimiter, escape character and NULL sentinel for one table's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedFormat {
    pub delimiter: u8,
    pub escape: u8,
    /// A field consisting of exactly `escape` followed by this byte is NULL
    pub null_marker: u8,
}

impl Default for DelimitedFormat {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            escape: b'\\',
            null_marker: b'N',
        }
    }
}

impl DelimitedFormat {
    pub fn new(delimiter: u8, escape: u8) -> Self {
        Self {
            delimiter,
            escape,
            ..Default::default()
        }
    }

    pub fn with_null_marker(mut self, marker: u8) -> Self {
        self.null_marker = marker;
        self
    }
}

/// Decodes lines into positional rows of a fixed width
#[derive(Debug, Clone)]
pub struct RowDecoder {
    format: DelimitedFormat,
    column_count: usize,
}

impl RowDecoder {
    pub fn new(format: DelimitedFormat, column_count: usize) -> Self {
        Self {
            format,
            column_count,
        }
    }

    pub fn format(&self) -> DelimitedFormat {
        self.format
    }

    /// Decode one line (without its terminator; a trailing `\r\n` or `\n` is
    /// tolerated). Never fails: short rows are padded with NULL and extra
    /// fields are ignored.
    pub fn decode_line(&self, line: &[u8]) -> SourceRow {
        let line = strip_terminator(line);
        let mut row = Vec::with_capacity(self.column_count);
        let mut field = Vec::new();
        let mut raw_is_null_marker = false;
        let mut raw_len = 0usize;
        let mut bytes = line.iter().copied();

        let esc = self.format.escape;
        let delim = self.format.delimiter;

        while let Some(b) = bytes.next() {
            if row.len() >= self.column_count {
                break;
            }
            if b == esc {
                raw_len += 1;
                match bytes.next() {
                    Some(next) => {
                        raw_len += 1;
                        if raw_len == 2 && next == self.format.null_marker {
                            raw_is_null_marker = true;
                        }
                        field.push(unescape(next, esc));
                    }
                    // dangling escape at end of line: keep it literally
                    None => field.push(esc),
                }
            } else if b == delim {
                row.push(finish_field(&mut field, raw_is_null_marker, raw_len));
                raw_is_null_marker = false;
                raw_len = 0;
            } else {
                raw_len += 1;
                field.push(b);
            }
        }

        if row.len() < self.column_count {
            row.push(finish_field(&mut field, raw_is_null_marker, raw_len));
        }
        row.truncate(self.column_count);
        while row.len() < self.column_count {
            row.push(SourceValue::Null);
        }
        row
    }
}

fn finish_field(field: &mut Vec<u8>, raw_is_null_marker: bool, raw_len: usize) -> SourceValue {
    let bytes = std::mem::take(field);
    if raw_is_null_marker && raw_len == 2 {
        SourceValue::Null
    } else {
        SourceValue::Text(bytes)
    }
}

fn unescape(next: u8, esc: u8) -> u8 {
    match next {
        b't' => b'\t',
        b'n' => b'\n',
        b'r' => b'\r',
        b'0' => 0,
        b'\\' => b'\\',
        other if other == esc => esc,
        other => other,
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Encode one row with the same rules `RowDecoder` reverses.
///
/// Used to write fixtures and by round-trip checks.
pub fn encode_row(format: DelimitedFormat, row: &[Option<&[u8]>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, field) in row.iter().enumerate() {
        if idx > 0 {
            out.push(format.delimiter);
        }
        match field {
            None => {
                out.push(format.escape);
                out.push(format.null_marker);
            }
            Some(bytes) => {
                for &b in bytes.iter() {
                    match b {
                        b'\t' => out.extend_from_slice(&[format.escape, b't']),
                        b'\n' => out.extend_from_slice(&[format.escape, b'n']),
                        b'\r' => out.extend_from_slice(&[format.escape, b'r']),
                        0 => out.extend_from_slice(&[format.escape, b'0']),
                        b if b == format.escape || b == format.delimiter => {
                            out.extend_from_slice(&[format.escape, b])
                        }
                        b => out.push(b),
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> SourceValue {
        SourceValue::text(s)
    }

    #[test]
    fn test_splits_plain_fields() {
        let decoder = RowDecoder::new(DelimitedFormat::default(), 3);
        assert_eq!(
            decoder.decode_line(b"1\talice\t2024-01-01\n"),
            vec![text("1"), text("alice"), text("2024-01-01")]
        );
    }

    #[test]
    fn test_escape_sequences() {
        let decoder = RowDecoder::new(DelimitedFormat::default(), 1);
        assert_eq!(
            decoder.decode_line(br"a\tb\nc\rd\0e\\f\qg"),
            vec![SourceValue::Text(b"a\tb\nc\rd\0e\\fqg".to_vec())]
        );
    }

    #[test]
    fn test_null_sentinel_only_when_whole_field() {
        let decoder = RowDecoder::new(DelimitedFormat::default(), 4);
        assert_eq!(
            decoder.decode_line(b"\\N\tx\\N\t\\\\N\tN"),
            vec![SourceValue::Null, text("xN"), text("\\N"), text("N")]
        );
    }

    #[test]
    fn test_short_row_padded_long_row_truncated() {
        let decoder = RowDecoder::new(DelimitedFormat::default(), 3);
        assert_eq!(
            decoder.decode_line(b"1"),
            vec![text("1"), SourceValue::Null, SourceValue::Null]
        );
        assert_eq!(
            decoder.decode_line(b"1\t2\t3\t4\t5"),
            vec![text("1"), text("2"), text("3")]
        );
    }

    #[test]
    fn test_empty_line_is_one_empty_field() {
        let decoder = RowDecoder::new(DelimitedFormat::default(), 2);
        assert_eq!(decoder.decode_line(b""), vec![text(""), SourceValue::Null]);
    }

    #[test]
    fn test_escaped_custom_delimiter_does_not_split() {
        let decoder = RowDecoder::new(DelimitedFormat::new(b',', b'\\'), 2);
        assert_eq!(decoder.decode_line(br"a\,b,c"), vec![text("a,b"), text("c")]);
    }

    #[test]
    fn test_round_trip_with_control_bytes() {
        let format = DelimitedFormat::default();
        fn f(bytes: &[u8]) -> Option<&[u8]> {
            Some(bytes)
        }
        let rows: Vec<Vec<Option<&[u8]>>> = vec![
            vec![f(b"tab\there"), f(b"line\nbreak"), None],
            vec![f(b"nul\0byte"), f(b"back\\slash"), f(b"cr\r")],
            vec![f(b""), f(b"\\N"), f(b"N")],
        ];
        let decoder = RowDecoder::new(format, 3);

        for row in rows {
            let encoded = encode_row(format, &row);
            assert!(!encoded.contains(&b'\n'));
            let decoded = decoder.decode_line(&encoded);
            let expected: Vec<SourceValue> = row
                .iter()
                .map(|f| match f {
                    Some(b) => SourceValue::Text(b.to_vec()),
                    None => SourceValue::Null,
                })
                .collect();
            assert_eq!(decoded, expected);
        }
    }
}
