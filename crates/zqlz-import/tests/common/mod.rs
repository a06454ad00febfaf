//! Common test utilities: a dump directory builder and a recording target

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zqlz_import::row_decoder::{DelimitedFormat, encode_row};
use zqlz_import::{ImportError, Result, TargetWriter, Value};

/// Writes a MySQL Shell style dump directory for one schema.
///
/// Data is written as zstd chunks; call [`DumpFixture::finish`] once all
/// tables are added to write the manifests.
pub struct DumpFixture {
    pub dir: TempDir,
    schema: String,
    tables: Vec<String>,
}

impl DumpFixture {
    pub fn new(schema: &str) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            schema: schema.to_string(),
            tables: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn basename(&self, table: &str) -> String {
        format!("{}@{}", self.schema, table)
    }

    fn write(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.path().join(name), contents).unwrap();
    }

    /// Add a table's DDL file and metadata
    pub fn add_table(&mut self, table: &str, ddl: &str, columns: &[&str]) {
        let metadata = serde_json::json!({
            "options": {
                "schema": self.schema,
                "table": table,
                "fieldsTerminatedBy": "\t",
                "fieldsEscapedBy": "\\",
                "columns": columns,
            },
            "compression": "zstd",
            "extension": "tsv.zst",
            "chunking": true,
        });
        let base = self.basename(table);
        self.write(&format!("{}.json", base), metadata.to_string().as_bytes());
        self.write(&format!("{}.sql", base), ddl.as_bytes());
        self.tables.push(table.to_string());
    }

    /// Write one zstd chunk of encoded rows
    pub fn write_chunk(&self, table: &str, sequence: u64, last: bool, rows: &[Vec<Option<String>>]) {
        let mut plain = Vec::new();
        for row in rows {
            let fields: Vec<Option<&[u8]>> = row.iter().map(|f| f.as_deref().map(str::as_bytes)).collect();
            plain.extend(encode_row(DelimitedFormat::default(), &fields));
            plain.push(b'\n');
        }
        let compressed = zstd::stream::encode_all(plain.as_slice(), 0).unwrap();
        self.write(&chunk_name(&self.basename(table), sequence, last), &compressed);
    }

    /// Write raw bytes under a chunk's file name
    pub fn write_raw_chunk(&self, table: &str, sequence: u64, last: bool, bytes: &[u8]) {
        self.write(&chunk_name(&self.basename(table), sequence, last), bytes);
    }

    pub fn finish(&self) {
        let basenames: serde_json::Map<String, serde_json::Value> = self
            .tables
            .iter()
            .map(|t| (t.clone(), serde_json::Value::String(self.basename(t))))
            .collect();
        let instance = serde_json::json!({ "dumper": "mysqlsh", "schemas": [self.schema] });
        let schema = serde_json::json!({ "tables": self.tables, "basenames": basenames });
        self.write("@.json", instance.to_string().as_bytes());
        self.write(&format!("{}.json", self.schema), schema.to_string().as_bytes());
        self.write("@.done.json", b"{}");
    }
}

fn chunk_name(base: &str, sequence: u64, last: bool) -> String {
    format!("{}{}{}.tsv.zst", base, if last { "@@" } else { "@" }, sequence)
}

/// `count` rows of `(id, name)` starting at `first_id`
pub fn numbered_rows(first_id: u64, count: u64) -> Vec<Vec<Option<String>>> {
    (first_id..first_id + count)
        .map(|i| vec![Some(i.to_string()), Some(format!("name {}", i))])
        .collect()
}

/// Everything a [`RecordingTarget`] was asked to do
#[derive(Debug, Default)]
pub struct Recorded {
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    /// Committed rows per target table, in commit order
    pub rows: Vec<(String, Vec<Value>)>,
    pub commits: usize,
    pub rollbacks: usize,
    pub deletes: usize,
}

impl Recorded {
    pub fn rows_for(&self, table: &str) -> Vec<&Vec<Value>> {
        self.rows
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, values)| values)
            .collect()
    }
}

/// Mock target that records calls instead of writing anywhere
pub struct RecordingTarget {
    pub state: Arc<Mutex<Recorded>>,
    pending: Option<Vec<(String, Vec<Value>)>>,
    /// Cancel this token once this many batches have committed
    cancel_after: Option<(usize, CancellationToken)>,
    fail_indexes: bool,
}

impl RecordingTarget {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Recorded::default())),
            pending: None,
            cancel_after: None,
            fail_indexes: false,
        }
    }

    pub fn cancel_after_commits(mut self, commits: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((commits, token));
        self
    }

    pub fn with_failing_indexes(mut self) -> Self {
        self.fail_indexes = true;
        self
    }

    pub fn recorded(&self) -> parking_lot::MutexGuard<'_, Recorded> {
        self.state.lock()
    }
}

#[async_trait]
impl TargetWriter for RecordingTarget {
    async fn create_table(&mut self, ddl: &str) -> Result<()> {
        self.state.lock().tables.push(ddl.to_string());
        Ok(())
    }

    async fn create_index(&mut self, ddl: &str) -> Result<()> {
        if self.fail_indexes {
            return Err(ImportError::TargetWrite("duplicate key".into()));
        }
        self.state.lock().indexes.push(ddl.to_string());
        Ok(())
    }

    async fn begin_batch(&mut self) -> Result<()> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn insert_row(&mut self, table: &str, _columns: &[String], values: &[Value]) -> Result<()> {
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| ImportError::TargetWrite("insert outside of a batch".into()))?;
        pending.push((table.to_string(), values.to_vec()));
        Ok(())
    }

    async fn commit_batch(&mut self) -> Result<()> {
        let rows = self.pending.take().unwrap_or_default();
        let commits = {
            let mut state = self.state.lock();
            state.rows.extend(rows);
            state.commits += 1;
            state.commits
        };
        if let Some((after, token)) = &self.cancel_after
            && commits >= *after
        {
            token.cancel();
        }
        Ok(())
    }

    async fn rollback_batch(&mut self) -> Result<()> {
        self.pending = None;
        self.state.lock().rollbacks += 1;
        Ok(())
    }

    async fn delete_artifact(&mut self) -> Result<()> {
        self.state.lock().deletes += 1;
        Ok(())
    }
}
