//! Import report aggregation
//!
//! [`ReportBuilder`] collects events while a run is in progress and is
//! finalized exactly once into an immutable [`ImportReport`].

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::progress::ImportPhase;
use crate::schema::SkippedIndexRecord;

/// Category of a non-fatal problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportWarningKind {
    /// Table DDL or metadata could not be parsed; the table was skipped
    SchemaParse,
    /// A default, constraint or clause was dropped from the target schema
    UnsupportedConstruct,
    /// A declared type was not recognised and mapped to text
    TypeMapping,
    /// A data chunk was missing or corrupt; the table's copy stopped early
    ChunkRead,
    /// A value did not parse as its column's type and was kept as text
    RowConversion,
    /// Data files and declared schema disagree
    DataLayout,
}

/// A non-fatal problem recorded during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportWarning {
    pub kind: ImportWarningKind,
    pub table: Option<String>,
    pub column: Option<String>,
    pub message: String,
}

impl ImportWarning {
    pub fn new(kind: ImportWarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn for_table(kind: ImportWarningKind, table: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            table: Some(table.into()),
            column: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

impl std::fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.table, &self.column) {
            (Some(t), Some(c)) => write!(f, "{}.{}: {}", t, c, self.message),
            (Some(t), None) => write!(f, "{}: {}", t, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// A table whose schema was created in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedTable {
    /// Source table name (schema-qualified when the source has schemas)
    pub name: String,
    pub target_name: String,
    /// Rows in committed batches
    pub rows: u64,
    /// `false` when copying stopped early on a chunk error or cancellation
    pub data_complete: bool,
    /// Values kept as text because they did not parse as their column type
    pub conversion_fallbacks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedIndex {
    pub name: String,
    pub table: String,
    pub column: String,
    pub unique: bool,
}

/// A single-column UNIQUE constraint emitted in a CREATE TABLE
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniqueColumnRecord {
    pub table: String,
    pub column: String,
}

/// A foreign key seen in the source; never created in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRecord {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Terminal summary of one import run
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: Uuid,
    pub source: String,
    pub phase: ImportPhase,
    /// The error that ended a failed run
    pub error: Option<String>,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub tables: Vec<ImportedTable>,
    pub total_rows: u64,
    pub indexes_created: Vec<CreatedIndex>,
    pub unique_columns_added: Vec<UniqueColumnRecord>,
    pub skipped_indexes: Vec<SkippedIndexRecord>,
    pub foreign_keys: Vec<ForeignKeyRecord>,
    pub warnings: Vec<ImportWarning>,
    /// The caller must redeem the run's cleanup request
    pub cleanup_required: bool,
}

impl ImportReport {
    pub fn elapsed(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.elapsed_ms)
    }

    pub fn is_success(&self) -> bool {
        self.phase == ImportPhase::Complete
    }

    pub fn table(&self, name: &str) -> Option<&ImportedTable> {
        self.tables
            .iter()
            .find(|t| t.name == name || t.target_name == name)
    }

    /// Warnings attributed to `table` (source or qualified name)
    pub fn warnings_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ImportWarning> + 'a {
        self.warnings.iter().filter(move |w| {
            w.table.as_deref().is_some_and(|t| {
                t == table || t.rsplit('.').next() == Some(table)
            })
        })
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        format!(
            "{}: {} tables, {} rows, {} indexes created, {} skipped, {} warnings in {:.1}s",
            self.phase,
            self.tables.len(),
            self.total_rows,
            self.indexes_created.len(),
            self.skipped_indexes.len(),
            self.warnings.len(),
            self.elapsed_ms as f64 / 1000.0
        )
    }
}

/// Append-only accumulator for one run
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    source: String,
    started_at: DateTime<Utc>,
    started: Instant,
    tables: Vec<ImportedTable>,
    indexes_created: Vec<CreatedIndex>,
    unique_columns_added: Vec<UniqueColumnRecord>,
    skipped_indexes: Vec<SkippedIndexRecord>,
    foreign_keys: Vec<ForeignKeyRecord>,
    warnings: Vec<ImportWarning>,
}

impl ReportBuilder {
    pub fn new(run_id: Uuid, source: impl Into<String>) -> Self {
        Self {
            run_id,
            source: source.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            tables: Vec::new(),
            indexes_created: Vec::new(),
            unique_columns_added: Vec::new(),
            skipped_indexes: Vec::new(),
            foreign_keys: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn table_imported(&mut self, table: ImportedTable) {
        self.tables.push(table);
    }

    pub fn index_created(&mut self, index: CreatedIndex) {
        self.indexes_created.push(index);
    }

    pub fn index_skipped(&mut self, record: SkippedIndexRecord) {
        self.skipped_indexes.push(record);
    }

    pub fn unique_column_added(&mut self, record: UniqueColumnRecord) {
        self.unique_columns_added.push(record);
    }

    pub fn foreign_key(&mut self, record: ForeignKeyRecord) {
        self.foreign_keys.push(record);
    }

    pub fn warning(&mut self, warning: ImportWarning) {
        tracing::warn!(kind = ?warning.kind, table = ?warning.table, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&mut self, warnings: impl IntoIterator<Item = ImportWarning>) {
        for warning in warnings {
            self.warning(warning);
        }
    }

    pub fn rows_so_far(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    /// Close the run. Consumes the builder so a report is produced once.
    pub fn finish(
        self,
        phase: ImportPhase,
        error: Option<String>,
        message: Option<String>,
    ) -> ImportReport {
        let total_rows = self.rows_so_far();
        ImportReport {
            run_id: self.run_id,
            source: self.source,
            phase,
            error,
            message,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            tables: self.tables,
            total_rows,
            indexes_created: self.indexes_created,
            unique_columns_added: self.unique_columns_added,
            skipped_indexes: self.skipped_indexes,
            foreign_keys: self.foreign_keys,
            warnings: self.warnings,
            cleanup_required: phase == ImportPhase::Cancelled,
        }
    }
}
