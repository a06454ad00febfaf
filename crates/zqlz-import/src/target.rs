//! Target writer interface and the SQLite reference writer

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, params_from_iter};
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::synthesizer::quote_identifier;
use crate::value::Value;

/// Destination of an import.
///
/// The orchestrator owns the writer exclusively for the whole run. Rows are
/// only written between `begin_batch` and `commit_batch`/`rollback_batch`.
#[async_trait]
pub trait TargetWriter: Send {
    async fn create_table(&mut self, ddl: &str) -> Result<()>;

    async fn create_index(&mut self, ddl: &str) -> Result<()>;

    async fn begin_batch(&mut self) -> Result<()>;

    async fn insert_row(&mut self, table: &str, columns: &[String], values: &[Value]) -> Result<()>;

    async fn commit_batch(&mut self) -> Result<()>;

    async fn rollback_batch(&mut self) -> Result<()>;

    /// Remove whatever the import wrote. Called only through [`CleanupRequest`].
    async fn delete_artifact(&mut self) -> Result<()>;
}

/// Issued when a run is cancelled; the caller redeems it once the run has
/// returned and it holds the writer again.
#[derive(Debug)]
#[must_use = "a cancelled import leaves a partial target until the cleanup is performed"]
pub struct CleanupRequest {
    run_id: Uuid,
    reason: String,
}

impl CleanupRequest {
    pub(crate) fn new(run_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            reason: reason.into(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Delete the partial target artifact
    pub async fn perform<W: TargetWriter + ?Sized>(self, writer: &mut W) -> Result<()> {
        tracing::info!(run_id = %self.run_id, reason = %self.reason, "removing partial import target");
        writer.delete_artifact().await
    }
}

struct PendingRow {
    sql: Arc<str>,
    values: Vec<rusqlite::types::Value>,
}

/// Writes into a SQLite database file.
///
/// Rows of a batch are buffered and written in one transaction on a blocking
/// thread when the batch commits.
pub struct SqliteTarget {
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
    batch: Option<Vec<PendingRow>>,
    insert_statements: HashMap<String, Arc<str>>,
}

impl std::fmt::Debug for SqliteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTarget")
            .field("path", &self.path)
            .field("in_batch", &self.batch.is_some())
            .finish()
    }
}

fn target_error(e: impl std::fmt::Display) -> ImportError {
    ImportError::TargetWrite(e.to_string())
}

impl SqliteTarget {
    /// Create a new database file at `path`. An existing file is replaced
    /// only when `overwrite` is set.
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            if !overwrite {
                return Err(ImportError::TargetWrite(format!(
                    "target '{}' already exists",
                    path.display()
                )));
            }
            remove_database_files(&path)?;
        }

        let conn = Connection::open(&path).map_err(target_error)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(target_error)?;
        tracing::info!(path = %path.display(), "created SQLite import target");

        Ok(Self {
            path: Some(path),
            conn: Arc::new(Mutex::new(Some(conn))),
            batch: None,
            insert_statements: HashMap::new(),
        })
    }

    /// In-memory target, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(target_error)?;
        Ok(Self {
            path: None,
            conn: Arc::new(Mutex::new(Some(conn))),
            batch: None,
            insert_statements: HashMap::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the open connection
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> Option<R> {
        self.conn.lock().as_ref().map(f)
    }

    async fn run_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| ImportError::TargetWrite("target connection is closed".into()))?;
            f(conn).map_err(target_error)
        })
        .await
        .map_err(|e| ImportError::TargetWrite(format!("target task failed: {}", e)))?
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    let mut companions = Vec::new();
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        companions.push(PathBuf::from(name));
    }
    for file in std::iter::once(path.to_path_buf()).chain(companions) {
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::debug!(file = %file.display(), "removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[async_trait]
impl TargetWriter for SqliteTarget {
    async fn create_table(&mut self, ddl: &str) -> Result<()> {
        let ddl = ddl.to_string();
        self.run_blocking(move |conn| conn.execute_batch(&ddl)).await
    }

    async fn create_index(&mut self, ddl: &str) -> Result<()> {
        let ddl = ddl.to_string();
        self.run_blocking(move |conn| conn.execute_batch(&ddl)).await
    }

    async fn begin_batch(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Err(ImportError::TargetWrite("batch already open".into()));
        }
        self.batch = Some(Vec::new());
        Ok(())
    }

    async fn insert_row(&mut self, table: &str, columns: &[String], values: &[Value]) -> Result<()> {
        let batch = self
            .batch
            .as_mut()
            .ok_or_else(|| ImportError::TargetWrite("insert outside of a batch".into()))?;

        let sql = Arc::clone(
            self.insert_statements
                .entry(table.to_string())
                .or_insert_with(|| insert_sql(table, columns).into()),
        );
        batch.push(PendingRow {
            sql,
            values: values.iter().map(rusqlite::types::Value::from).collect(),
        });
        Ok(())
    }

    async fn commit_batch(&mut self) -> Result<()> {
        let rows = self
            .batch
            .take()
            .ok_or_else(|| ImportError::TargetWrite("commit without a batch".into()))?;
        if rows.is_empty() {
            return Ok(());
        }
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                let mut stmt = tx.prepare_cached(&row.sql)?;
                stmt.execute(params_from_iter(row.values.iter()))?;
            }
            tx.commit()
        })
        .await
    }

    async fn rollback_batch(&mut self) -> Result<()> {
        // nothing reaches the database before commit
        self.batch = None;
        Ok(())
    }

    async fn delete_artifact(&mut self) -> Result<()> {
        self.batch = None;
        if let Some(conn) = self.conn.lock().take()
            && let Err((_, e)) = conn.close()
        {
            tracing::warn!(error = %e, "closing target before removal failed");
        }
        match &self.path {
            Some(path) => remove_database_files(path),
            None => Ok(()),
        }
    }
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        names.join(", "),
        placeholders.join(", ")
    )
}
