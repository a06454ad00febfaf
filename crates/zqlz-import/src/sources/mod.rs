//! Import sources
//!
//! Each source kind introspects its input into [`SourceTable`]s and streams a
//! table's rows on a blocking reader thread through a bounded channel.

mod dump_directory;
mod sql_dump;
mod sqlite_file;

pub use dump_directory::DumpDirectorySource;
pub use sql_dump::SqlDumpSource;
pub use sqlite_file::SqliteFileSource;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ChunkReadError, ImportError, Result};
use crate::options::ImportOptions;
use crate::report::ImportWarning;
use crate::schema::SourceTable;
use crate::value::SourceRow;

/// Result of introspecting a source
#[derive(Debug, Default)]
pub struct Introspection {
    /// Tables in source order
    pub tables: Vec<SourceTable>,
    /// Tables skipped or altered while reading metadata
    pub warnings: Vec<ImportWarning>,
}

type RowItem = std::result::Result<SourceRow, ChunkReadError>;

/// Rows of one table, produced on a blocking thread
pub struct RowStream {
    table: String,
    receiver: mpsc::Receiver<RowItem>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream").field("table", &self.table).finish()
    }
}

/// Sending half handed to a source's blocking reader
pub(crate) struct RowSender {
    sender: mpsc::Sender<RowItem>,
}

impl RowSender {
    /// Returns `false` once the consumer has gone away; the reader should stop.
    pub(crate) fn send(&self, row: SourceRow) -> bool {
        self.sender.blocking_send(Ok(row)).is_ok()
    }
}

impl RowStream {
    /// Run `produce` on the blocking pool. Its error, if any, becomes the
    /// final item of the stream.
    pub(crate) fn spawn<F>(table: impl Into<String>, capacity: usize, produce: F) -> Self
    where
        F: FnOnce(&RowSender) -> std::result::Result<(), ChunkReadError> + Send + 'static,
    {
        let (tx, receiver) = mpsc::channel(capacity.max(1));
        let reader = tokio::task::spawn_blocking(move || {
            let sender = RowSender { sender: tx };
            if let Err(e) = produce(&sender) {
                let _ = sender.sender.blocking_send(Err(e));
            }
        });
        Self {
            table: table.into(),
            receiver,
            reader: Some(reader),
        }
    }

    /// A stream that yields a single error
    pub(crate) fn failed(error: ChunkReadError) -> Self {
        let (tx, receiver) = mpsc::channel(1);
        let table = error.table.clone();
        let _ = tx.try_send(Err(error));
        Self {
            table,
            receiver,
            reader: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next row, or `None` at the end of the table's data
    pub async fn next(&mut self) -> Option<RowItem> {
        match self.receiver.recv().await {
            Some(item) => Some(item),
            None => {
                let reader = self.reader.take()?;
                match reader.await {
                    Ok(()) => None,
                    Err(e) => Some(Err(ChunkReadError::new(
                        &self.table,
                        format!("reader task failed: {}", e),
                    ))),
                }
            }
        }
    }
}

/// The closed set of supported sources
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// A SQLite database file
    EmbeddedFile(SqliteFileSource),
    /// A MySQL Shell dump directory
    DumpDirectory(DumpDirectorySource),
    /// A plain SQL dump file, optionally gzip or zstd compressed
    SingleFileDump(SqlDumpSource),
}

impl ImportSource {
    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        ImportSource::EmbeddedFile(SqliteFileSource::new(path))
    }

    pub fn dump_directory(path: impl Into<PathBuf>) -> Self {
        ImportSource::DumpDirectory(DumpDirectorySource::new(path))
    }

    pub fn sql_dump(path: impl Into<PathBuf>) -> Self {
        ImportSource::SingleFileDump(SqlDumpSource::new(path))
    }

    /// Human readable description for logs and the report
    pub fn describe(&self) -> String {
        match self {
            ImportSource::EmbeddedFile(s) => format!("sqlite file {}", s.path().display()),
            ImportSource::DumpDirectory(s) => format!("dump directory {}", s.path().display()),
            ImportSource::SingleFileDump(s) => format!("sql dump {}", s.path().display()),
        }
    }

    /// Read source metadata into normalized tables.
    ///
    /// Only a missing or unreadable source is an error; problems with single
    /// tables are returned as warnings.
    pub async fn introspect(&mut self, options: &ImportOptions) -> Result<Introspection> {
        match self {
            ImportSource::EmbeddedFile(s) => s.introspect(options).await,
            ImportSource::DumpDirectory(s) => s.introspect(options).await,
            ImportSource::SingleFileDump(s) => s.introspect(options).await,
        }
    }

    /// Stream a table's rows in source column order
    pub fn open_rows(&self, table: &SourceTable, options: &ImportOptions) -> RowStream {
        match self {
            ImportSource::EmbeddedFile(s) => s.open_rows(table, options),
            ImportSource::DumpDirectory(s) => s.open_rows(table, options),
            ImportSource::SingleFileDump(s) => s.open_rows(table, options),
        }
    }
}

/// Run blocking introspection work off the async runtime
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImportError::Source(format!("introspection task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SourceValue;

    #[tokio::test]
    async fn test_row_stream_delivers_rows_then_error() {
        let mut stream = RowStream::spawn("t", 2, |tx| {
            for i in 0..5 {
                if !tx.send(vec![SourceValue::Integer(i)]) {
                    return Ok(());
                }
            }
            Err(ChunkReadError::new("t", "chunk 1 is missing"))
        });

        let mut rows = 0;
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(_) => rows += 1,
                Err(e) => error = Some(e),
            }
        }
        assert_eq!(rows, 5);
        assert_eq!(error.unwrap().message, "chunk 1 is missing");
    }

    #[tokio::test]
    async fn test_reader_panic_surfaces_as_error() {
        let mut stream = RowStream::spawn("t", 1, |_| panic!("boom"));
        let item = stream.next().await.unwrap();
        assert!(item.is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_reader() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let mut stream = RowStream::spawn("t", 1, move |tx| {
            let mut sent = 0;
            while tx.send(vec![SourceValue::Null]) {
                sent += 1;
            }
            let _ = done_tx.send(sent);
            Ok(())
        });
        assert!(stream.next().await.is_some());
        drop(stream);

        let sent = tokio::task::spawn_blocking(move || done_rx.recv().unwrap())
            .await
            .unwrap();
        assert!(sent < 10);
    }
}
