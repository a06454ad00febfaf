//! Error types for the import engine

use thiserror::Error;

/// Errors that end an import run or a table-scoped step.
///
/// Only `SourceNotFound`, `Source` and `TargetWrite` ever terminate a run;
/// the table-scoped variants are caught by the orchestrator and turned into
/// report warnings.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Schema parse error in table '{table}': {message}")]
    SchemaParse { table: String, message: String },

    #[error(transparent)]
    ChunkRead(#[from] ChunkReadError),

    #[error("Target write error: {0}")]
    TargetWrite(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ImportError {
    /// Whether this error makes the whole run unusable rather than one table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::SourceNotFound(_)
                | ImportError::Source(_)
                | ImportError::TargetWrite(_)
                | ImportError::InvalidOptions(_)
        )
    }
}

/// A failure while reading one table's data files.
///
/// Aborts the remaining copy of that table only.
#[derive(Debug, Error)]
#[error("Chunk read error in table '{table}': {message}")]
pub struct ChunkReadError {
    pub table: String,
    pub message: String,
}

impl ChunkReadError {
    pub fn new(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// A CREATE TABLE / CREATE INDEX statement that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DdlParseError {
    #[error("unexpected end of statement")]
    UnexpectedEnd,

    #[error("expected {expected}, found '{found}'")]
    Expected { expected: String, found: String },

    #[error("unbalanced parentheses")]
    Unbalanced,

    #[error("unterminated quoted text")]
    Unterminated,

    #[error("table '{0}' declares no columns")]
    NoColumns(String),

    #[error("not a {0} statement")]
    NotStatement(&'static str),
}

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ImportError::SourceNotFound("x".into()).is_fatal());
        assert!(ImportError::TargetWrite("disk full".into()).is_fatal());
        assert!(!ImportError::from(ChunkReadError::new("t", "corrupt")).is_fatal());
        assert!(
            !ImportError::SchemaParse {
                table: "t".into(),
                message: "bad".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn chunk_error_message_names_table() {
        let err = ChunkReadError::new("orders", "missing chunk 3");
        assert_eq!(
            err.to_string(),
            "Chunk read error in table 'orders': missing chunk 3"
        );
    }
}
