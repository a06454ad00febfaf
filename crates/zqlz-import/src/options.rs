//! Import options

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::row_decoder::DelimitedFormat;

/// Characters that spell a control byte after the escape character
const ESCAPE_CODES: [char; 4] = ['t', 'n', 'r', '0'];

/// Options for one import run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    /// Rows per target transaction
    pub batch_size: usize,
    /// Overrides the field delimiter declared by the source
    pub field_delimiter: Option<char>,
    /// Overrides the escape character declared by the source
    pub escape_char: Option<char>,
    /// Character that follows the escape character to spell NULL
    pub null_sentinel: char,
    /// Only import these tables (empty = all)
    pub include_tables: Vec<String>,
    /// Never import these tables
    pub exclude_tables: Vec<String>,
    /// Source table name to target table name
    pub table_mappings: HashMap<String, String>,
    pub create_indexes: bool,
    /// Decoded rows buffered between the reader and the writer
    pub channel_capacity: Option<usize>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            field_delimiter: None,
            escape_char: None,
            null_sentinel: 'N',
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            table_mappings: HashMap::new(),
            create_indexes: true,
            channel_capacity: None,
        }
    }
}

impl ImportOptions {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.include_tables = tables;
        self
    }

    pub fn with_table_mapping(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.table_mappings.insert(source.into(), target.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ImportError::InvalidOptions(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.channel_capacity == Some(0) {
            return Err(ImportError::InvalidOptions(
                "channel_capacity must be at least 1".into(),
            ));
        }
        for (name, c) in [
            ("field_delimiter", self.field_delimiter),
            ("escape_char", self.escape_char),
            ("null_sentinel", Some(self.null_sentinel)),
        ] {
            if let Some(c) = c
                && !c.is_ascii()
            {
                return Err(ImportError::InvalidOptions(format!(
                    "{} must be a single ASCII character, got '{}'",
                    name, c
                )));
            }
        }
        if self.field_delimiter.is_some() && self.field_delimiter == self.escape_char {
            return Err(ImportError::InvalidOptions(
                "field_delimiter and escape_char must differ".into(),
            ));
        }
        if ESCAPE_CODES.contains(&self.null_sentinel) {
            return Err(ImportError::InvalidOptions(format!(
                "null_sentinel '{}' collides with the \\{} escape sequence",
                self.null_sentinel, self.null_sentinel
            )));
        }
        if [self.field_delimiter, self.escape_char].contains(&Some(self.null_sentinel)) {
            return Err(ImportError::InvalidOptions(
                "null_sentinel must differ from field_delimiter and escape_char".into(),
            ));
        }
        Ok(())
    }

    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity
            .unwrap_or_else(|| self.batch_size.saturating_mul(2))
            .max(1)
    }

    /// Whether a table passes the include/exclude filters. Both the bare and
    /// the schema-qualified name are matched, case-insensitively.
    pub fn includes_table(&self, name: &str, qualified: &str) -> bool {
        let matches = |list: &[String]| {
            list.iter()
                .any(|t| t.eq_ignore_ascii_case(name) || t.eq_ignore_ascii_case(qualified))
        };
        if !self.include_tables.is_empty() && !matches(&self.include_tables) {
            return false;
        }
        !matches(&self.exclude_tables)
    }

    /// Target name for a table, honouring `table_mappings`
    pub fn target_name(&self, name: &str, qualified: &str, default: &str) -> String {
        self.table_mappings
            .get(qualified)
            .or_else(|| self.table_mappings.get(name))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Row format for a source that declares `delimiter` and `escape`,
    /// after applying overrides. The effective delimiter, escape and null
    /// marker must all differ.
    pub fn delimited_format(&self, delimiter: u8, escape: u8) -> Result<DelimitedFormat> {
        let pick = |over: Option<char>, declared: u8| over.map_or(declared, |c| c as u8);
        let delimiter = pick(self.field_delimiter, delimiter);
        let escape = pick(self.escape_char, escape);
        let null_marker = self.null_sentinel as u8;
        if delimiter == escape {
            return Err(ImportError::InvalidOptions(format!(
                "field delimiter and escape character are both '{}'",
                escape.escape_ascii()
            )));
        }
        if null_marker == escape || null_marker == delimiter {
            return Err(ImportError::InvalidOptions(format!(
                "null sentinel '{}' clashes with the field delimiter or escape character",
                null_marker.escape_ascii()
            )));
        }
        Ok(DelimitedFormat::new(delimiter, escape).with_null_marker(null_marker))
    }
}
