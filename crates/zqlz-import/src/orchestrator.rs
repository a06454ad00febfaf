//! Import orchestration
//!
//! [`Importer::run`] drives one import through
//! `Analyzing → CreatingSchema → CopyingData → CreatingIndexes → Complete`.
//! A fatal error moves the run to `Failed`, a cancelled token to
//! `Cancelled`; either way the caller gets an [`ImportReport`].

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::codec::ValueCodec;
use crate::error::ImportError;
use crate::options::ImportOptions;
use crate::progress::{ImportPhase, ImportProgressCallback, ImportProgressSnapshot};
use crate::report::{
    CreatedIndex, ForeignKeyRecord, ImportReport, ImportWarning, ImportWarningKind, ImportedTable,
    ReportBuilder, UniqueColumnRecord,
};
use crate::schema::{SkippedIndexRecord, SourceTable};
use crate::sources::ImportSource;
use crate::synthesizer::{PlannedIndex, synthesize_table};
use crate::target::{CleanupRequest, TargetWriter};
use crate::type_mapping::TargetKind;
use crate::value::Value;

/// Result of a run: the report, plus the cleanup the caller owes when the
/// run was cancelled
#[derive(Debug)]
#[must_use]
pub struct ImportOutcome {
    pub report: ImportReport,
    pub cleanup: Option<CleanupRequest>,
}

/// Why a run stopped before completing
#[derive(Debug)]
enum Stop {
    Cancelled,
    Failed(ImportError),
}

impl From<ImportError> for Stop {
    fn from(e: ImportError) -> Self {
        Stop::Failed(e)
    }
}

/// What schema creation leaves for the later phases
struct PreparedTable {
    column_names: Vec<String>,
    column_kinds: Vec<TargetKind>,
    indexes: Vec<PlannedIndex>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    tables_total: usize,
    tables_completed: usize,
    indexes_total: usize,
    indexes_completed: usize,
}

/// One import run
pub struct Importer {
    source: ImportSource,
    options: ImportOptions,
    progress: Option<ImportProgressCallback>,
    cancel: CancellationToken,
    phase: ImportPhase,
    counters: Counters,
}

impl std::fmt::Debug for Importer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Importer")
            .field("source", &self.source)
            .field("options", &self.options)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Importer {
    pub fn new(source: ImportSource, options: ImportOptions) -> Self {
        Self {
            source,
            options,
            progress: None,
            cancel: CancellationToken::new(),
            phase: ImportPhase::Analyzing,
            counters: Counters::default(),
        }
    }

    pub fn with_progress(mut self, progress: ImportProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the import into `writer`.
    ///
    /// Never fails: errors end up in the report. When the run is cancelled
    /// the outcome carries exactly one [`CleanupRequest`].
    pub async fn run<W: TargetWriter + ?Sized>(mut self, writer: &mut W) -> ImportOutcome {
        let run_id = Uuid::new_v4();
        let source = self.source.describe();
        let span = tracing::info_span!("import", %run_id, source = %source);
        let mut report = ReportBuilder::new(run_id, source);

        let result = self
            .execute(writer, &mut report)
            .instrument(span.clone())
            .await;

        let (phase, error, message) = match result {
            Ok(()) => (ImportPhase::Complete, None, None),
            Err(Stop::Cancelled) => (
                ImportPhase::Cancelled,
                None,
                Some(format!("cancelled while {}", self.phase)),
            ),
            Err(Stop::Failed(e)) => (
                ImportPhase::Failed,
                Some(e.to_string()),
                Some(format!("failed while {}", self.phase)),
            ),
        };
        let report = report.finish(phase, error, message);

        span.in_scope(|| match phase {
            ImportPhase::Failed => tracing::error!(
                error = report.error.as_deref().unwrap_or_default(),
                "{}",
                report.summary()
            ),
            _ => tracing::info!("{}", report.summary()),
        });

        self.phase = phase;
        let mut last = self.snapshot(report.summary());
        last.rows_completed = report.total_rows;
        self.emit(last);

        let cleanup = (phase == ImportPhase::Cancelled)
            .then(|| CleanupRequest::new(run_id, "import cancelled before completion"));
        ImportOutcome { report, cleanup }
    }

    fn snapshot(&self, message: impl Into<String>) -> ImportProgressSnapshot {
        let mut snapshot = ImportProgressSnapshot::new(self.phase, message);
        snapshot.tables_total = self.counters.tables_total;
        snapshot.tables_completed = self.counters.tables_completed;
        snapshot.indexes_total = self.counters.indexes_total;
        snapshot.indexes_completed = self.counters.indexes_completed;
        snapshot
    }

    fn emit(&self, snapshot: ImportProgressSnapshot) {
        if let Some(progress) = &self.progress {
            progress(snapshot);
        }
    }

    fn check_cancelled(&self) -> Result<(), Stop> {
        if self.cancel.is_cancelled() {
            tracing::info!(phase = %self.phase, "cancellation observed");
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self, phase: ImportPhase, message: &str) -> Result<(), Stop> {
        self.check_cancelled()?;
        self.phase = phase;
        tracing::debug!(phase = %phase, "entering phase");
        self.emit(self.snapshot(message));
        Ok(())
    }

    async fn execute<W: TargetWriter + ?Sized>(
        &mut self,
        writer: &mut W,
        report: &mut ReportBuilder,
    ) -> Result<(), Stop> {
        self.options.validate()?;

        self.enter(ImportPhase::Analyzing, "reading source metadata")?;
        let cancel = self.cancel.clone();
        let introspection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Stop::Cancelled),
            result = self.source.introspect(&self.options) => result?,
        };
        report.warnings(introspection.warnings);
        let mut tables = introspection.tables;
        self.counters.tables_total = tables.len();
        tracing::info!(tables = tables.len(), "source analyzed");

        self.enter(ImportPhase::CreatingSchema, "creating tables")?;
        let mut prepared = Vec::with_capacity(tables.len());
        for table in &mut tables {
            self.check_cancelled()?;
            prepared.push(self.create_table(writer, table, report).await?);
        }

        self.counters.tables_completed = 0;
        self.enter(ImportPhase::CopyingData, "copying rows")?;
        for (table, prepared) in tables.iter().zip(&prepared) {
            self.check_cancelled()?;
            let mut imported = ImportedTable {
                name: table.qualified_name(),
                target_name: table.target_name.clone(),
                rows: 0,
                data_complete: false,
                conversion_fallbacks: 0,
            };
            let copied = self
                .copy_table(writer, table, prepared, &mut imported, report)
                .await;
            report.table_imported(imported);
            copied?;
            self.counters.tables_completed += 1;
        }

        self.counters.indexes_total = if self.options.create_indexes {
            prepared.iter().map(|p| p.indexes.len()).sum()
        } else {
            0
        };
        self.enter(ImportPhase::CreatingIndexes, "creating indexes")?;
        for (table, prepared) in tables.iter().zip(&prepared) {
            for index in &prepared.indexes {
                self.check_cancelled()?;
                self.create_index(writer, table, index, report).await;
            }
        }

        Ok(())
    }

    async fn create_table<W: TargetWriter + ?Sized>(
        &mut self,
        writer: &mut W,
        table: &mut SourceTable,
        report: &mut ReportBuilder,
    ) -> Result<PreparedTable, Stop> {
        let label = table.qualified_name();
        let synthesized = synthesize_table(table);

        writer.create_table(&synthesized.create_table).await?;
        tracing::info!(table = %label, target = %table.target_name, "created table");

        report.warnings(synthesized.warnings);
        for column in &synthesized.unique_columns {
            report.unique_column_added(UniqueColumnRecord {
                table: label.clone(),
                column: column.clone(),
            });
        }
        for fk in &table.foreign_keys {
            report.foreign_key(ForeignKeyRecord {
                table: label.clone(),
                column: fk.column.clone(),
                referenced_table: fk.referenced_table.clone(),
                referenced_column: fk.referenced_column.clone(),
            });
        }
        for skipped in &table.skipped_indexes {
            tracing::debug!(table = %label, index = %skipped.index, reason = %skipped.reason, "index skipped");
            report.index_skipped(skipped.clone());
        }

        self.counters.tables_completed += 1;
        let mut snapshot = self.snapshot(format!("created {}", table.target_name));
        snapshot.current_table = Some(label);
        self.emit(snapshot);

        Ok(PreparedTable {
            column_names: table.column_names(),
            column_kinds: synthesized.column_kinds,
            indexes: synthesized.indexes,
        })
    }

    async fn copy_table<W: TargetWriter + ?Sized>(
        &self,
        writer: &mut W,
        table: &SourceTable,
        prepared: &PreparedTable,
        imported: &mut ImportedTable,
        report: &mut ReportBuilder,
    ) -> Result<(), Stop> {
        let label = imported.name.clone();
        let batch_size = self.options.batch_size;
        let mut codec = ValueCodec::new(prepared.column_kinds.clone());
        let mut stream = self.source.open_rows(table, &self.options);
        let mut batch: Vec<Vec<Value>> = Vec::with_capacity(batch_size);
        let mut chunk_error = None;

        tracing::info!(table = %label, rows = ?table.row_estimate, "copying table");
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(table = %label, pending = batch.len(), "cancelled mid-table; dropping uncommitted rows");
                    return Err(Stop::Cancelled);
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(row)) => {
                    let (values, issue) = codec.convert_row(row);
                    if let Some(issue) = issue {
                        let column = prepared
                            .column_names
                            .get(issue.column_index)
                            .cloned()
                            .unwrap_or_default();
                        report.warning(
                            ImportWarning::for_table(
                                ImportWarningKind::RowConversion,
                                &label,
                                format!(
                                    "value '{}' is not a valid {}; kept as text (reported once per table)",
                                    issue.raw,
                                    issue.kind.display_name()
                                ),
                            )
                            .with_column(column),
                        );
                    }
                    imported.conversion_fallbacks = codec.fallbacks();
                    batch.push(values);
                    if batch.len() >= batch_size {
                        self.write_batch(writer, table, prepared, imported, &mut batch)
                            .await?;
                    }
                }
                Some(Err(e)) => {
                    chunk_error = Some(e);
                    break;
                }
                None => break,
            }
        }

        // rows decoded before a chunk failure are still good
        if !batch.is_empty() {
            self.write_batch(writer, table, prepared, imported, &mut batch)
                .await?;
        }

        match chunk_error {
            Some(e) => {
                report.warning(ImportWarning::for_table(
                    ImportWarningKind::ChunkRead,
                    &label,
                    format!(
                        "copy stopped after {} rows: {}",
                        imported.rows, e.message
                    ),
                ));
                imported.data_complete = false;
            }
            None => {
                imported.data_complete = true;
                tracing::info!(table = %label, rows = imported.rows, "table copied");
            }
        }
        Ok(())
    }

    /// Write `batch` in one target transaction. Rows count only once the
    /// commit succeeds.
    async fn write_batch<W: TargetWriter + ?Sized>(
        &self,
        writer: &mut W,
        table: &SourceTable,
        prepared: &PreparedTable,
        imported: &mut ImportedTable,
        batch: &mut Vec<Vec<Value>>,
    ) -> Result<(), Stop> {
        self.check_cancelled()?;

        writer.begin_batch().await?;
        let mut written = Ok(());
        for values in batch.iter() {
            written = writer
                .insert_row(&table.target_name, &prepared.column_names, values)
                .await;
            if written.is_err() {
                break;
            }
        }
        if written.is_ok() {
            written = writer.commit_batch().await;
        }
        if let Err(e) = written {
            if let Err(rollback) = writer.rollback_batch().await {
                tracing::warn!(table = %imported.name, error = %rollback, "rollback failed");
            }
            return Err(Stop::Failed(e));
        }

        imported.rows += batch.len() as u64;
        batch.clear();
        tracing::trace!(table = %imported.name, rows = imported.rows, "batch committed");

        let mut snapshot = self.snapshot(format!("copied {} rows of {}", imported.rows, imported.target_name));
        snapshot.current_table = Some(imported.name.clone());
        snapshot.rows_completed = imported.rows;
        snapshot.rows_total = table.row_estimate;
        self.emit(snapshot);
        Ok(())
    }

    /// Index failures are recorded as skipped indexes; they never fail the run
    async fn create_index<W: TargetWriter + ?Sized>(
        &mut self,
        writer: &mut W,
        table: &SourceTable,
        index: &PlannedIndex,
        report: &mut ReportBuilder,
    ) {
        let label = table.qualified_name();
        if !self.options.create_indexes {
            report.index_skipped(SkippedIndexRecord {
                index: index.name.clone(),
                table: label,
                reason: "index creation disabled by options".into(),
            });
            return;
        }

        match writer.create_index(&index.ddl).await {
            Ok(()) => {
                tracing::info!(table = %label, index = %index.name, "created index");
                report.index_created(CreatedIndex {
                    name: index.name.clone(),
                    table: label.clone(),
                    column: index.column.clone(),
                    unique: index.unique,
                });
            }
            Err(e) => {
                report.warning(ImportWarning::for_table(
                    ImportWarningKind::UnsupportedConstruct,
                    &label,
                    format!("index '{}' could not be created: {}", index.name, e),
                ));
                report.index_skipped(SkippedIndexRecord {
                    index: index.name.clone(),
                    table: label.clone(),
                    reason: format!("target rejected index: {}", e),
                });
            }
        }

        self.counters.indexes_completed += 1;
        let mut snapshot = self.snapshot(format!("index {}", index.name));
        snapshot.current_table = Some(label);
        self.emit(snapshot);
    }
}

/// Run an import on its own task so the caller is never blocked. The writer
/// is handed back with the outcome so a cleanup request can be redeemed.
pub fn spawn_import<W>(importer: Importer, mut writer: W) -> JoinHandle<(ImportOutcome, W)>
where
    W: TargetWriter + 'static,
{
    tokio::spawn(async move {
        let outcome = importer.run(&mut writer).await;
        (outcome, writer)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;
    use crate::target::SqliteTarget;
    use async_trait::async_trait;
    use rusqlite::Connection;

    fn sqlite_source(rows: usize) -> (tempfile::TempDir, ImportSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER, note TEXT);
             CREATE INDEX items_note ON items (note);",
        )
        .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO items (qty, note) VALUES (?1, ?2)",
                rusqlite::params![if i == 3 { "lots" } else { "1" }, format!("n{}", i)],
            )
            .unwrap();
        }
        (dir, ImportSource::sqlite_file(path))
    }

    #[tokio::test]
    async fn test_sqlite_to_sqlite_completes() {
        let (_dir, source) = sqlite_source(25);
        let (progress, mut snapshots) = progress_channel();
        let mut target = SqliteTarget::in_memory().unwrap();

        let outcome = Importer::new(source, ImportOptions::default().with_batch_size(10))
            .with_progress(progress)
            .run(&mut target)
            .await;

        let report = outcome.report;
        assert!(outcome.cleanup.is_none());
        assert_eq!(report.phase, ImportPhase::Complete, "{:?}", report.error);
        assert_eq!(report.total_rows, 25);
        assert_eq!(report.indexes_created.len(), 1);
        assert_eq!(report.tables[0].conversion_fallbacks, 1);
        assert_eq!(
            report
                .warnings
                .iter()
                .filter(|w| w.kind == ImportWarningKind::RowConversion)
                .count(),
            1
        );

        let mut phases = Vec::new();
        while let Ok(snapshot) = snapshots.try_recv() {
            if phases.last() != Some(&snapshot.phase) {
                phases.push(snapshot.phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                ImportPhase::Analyzing,
                ImportPhase::CreatingSchema,
                ImportPhase::CopyingData,
                ImportPhase::CreatingIndexes,
                ImportPhase::Complete,
            ]
        );

        let count: i64 = target
            .with_connection(|c| c.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0)))
            .unwrap()
            .unwrap();
        assert_eq!(count, 25);
    }

    struct BrokenTarget;

    #[async_trait]
    impl TargetWriter for BrokenTarget {
        async fn create_table(&mut self, _ddl: &str) -> crate::Result<()> {
            Ok(())
        }
        async fn create_index(&mut self, _ddl: &str) -> crate::Result<()> {
            Ok(())
        }
        async fn begin_batch(&mut self) -> crate::Result<()> {
            Ok(())
        }
        async fn insert_row(&mut self, _: &str, _: &[String], _: &[Value]) -> crate::Result<()> {
            Ok(())
        }
        async fn commit_batch(&mut self) -> crate::Result<()> {
            Err(ImportError::TargetWrite("disk full".into()))
        }
        async fn rollback_batch(&mut self) -> crate::Result<()> {
            Ok(())
        }
        async fn delete_artifact(&mut self) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_target_error_fails_run_with_report() {
        let (_dir, source) = sqlite_source(5);
        let outcome = Importer::new(source, ImportOptions::default())
            .run(&mut BrokenTarget)
            .await;
        assert_eq!(outcome.report.phase, ImportPhase::Failed);
        assert!(outcome.report.error.as_deref().unwrap().contains("disk full"));
        assert_eq!(outcome.report.total_rows, 0);
        assert!(outcome.cleanup.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_dir, source) = sqlite_source(5);
        let token = CancellationToken::new();
        token.cancel();
        let mut target = SqliteTarget::in_memory().unwrap();
        let outcome = Importer::new(source, ImportOptions::default())
            .with_cancellation(token)
            .run(&mut target)
            .await;
        assert_eq!(outcome.report.phase, ImportPhase::Cancelled);
        assert!(outcome.report.cleanup_required);
        assert!(outcome.cleanup.is_some());
        assert!(outcome.report.error.is_none());
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_analysis() {
        let (_dir, source) = sqlite_source(1);
        let mut target = SqliteTarget::in_memory().unwrap();
        let outcome = Importer::new(source, ImportOptions::default().with_batch_size(0))
            .run(&mut target)
            .await;
        assert_eq!(outcome.report.phase, ImportPhase::Failed);
        assert!(outcome.report.tables.is_empty());
    }

    #[tokio::test]
    async fn test_index_creation_can_be_disabled() {
        let (_dir, source) = sqlite_source(3);
        let mut target = SqliteTarget::in_memory().unwrap();
        let options = ImportOptions {
            create_indexes: false,
            ..Default::default()
        };
        let report = Importer::new(source, options).run(&mut target).await.report;
        assert!(report.indexes_created.is_empty());
        assert_eq!(report.skipped_indexes.len(), 1);
        assert_eq!(report.skipped_indexes[0].reason, "index creation disabled by options");
    }

    #[tokio::test]
    async fn test_spawned_import_returns_writer() {
        let (_dir, source) = sqlite_source(4);
        let target = SqliteTarget::in_memory().unwrap();
        let (outcome, target) = spawn_import(Importer::new(source, ImportOptions::default()), target)
            .await
            .unwrap();
        assert!(outcome.report.is_success());
        let count: i64 = target
            .with_connection(|c| c.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0)))
            .unwrap()
            .unwrap();
        assert_eq!(count, 4);
    }
}
