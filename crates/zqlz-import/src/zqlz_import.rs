//! ZQLZ database import engine
//!
//! Loads an externally produced database export into a target database,
//! keeping as much of the source schema as its metadata allows.
//!
//! # Architecture
//!
//! ```text
//! ImportSource ──introspect──▶ SourceTable ──synthesize──▶ CREATE TABLE / CREATE INDEX
//!      │                                                          │
//!      └──open_rows──▶ RowStream ──ValueCodec──▶ batches ──▶ TargetWriter
//! ```
//!
//! Three sources are supported: a SQLite database file, a MySQL Shell dump
//! directory (chunked, optionally zstd or gzip compressed TSV) and a plain SQL
//! dump from pg_dump or mysqldump.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut target = SqliteTarget::create("imported.db", false)?;
//! let importer = Importer::new(ImportSource::dump_directory("/dumps/shop"), ImportOptions::default());
//! let outcome = importer.run(&mut target).await;
//! if let Some(cleanup) = outcome.cleanup {
//!     cleanup.perform(&mut target).await?;
//! }
//! println!("{}", outcome.report.summary());
//! ```

pub mod chunk_reader;
pub mod codec;
pub mod ddl_parser;
mod error;
mod options;
mod orchestrator;
mod progress;
mod report;
pub mod row_decoder;
mod schema;
mod sources;
pub mod sql_scanner;
pub mod synthesizer;
mod target;
pub mod type_mapping;
mod value;

pub use error::{ChunkReadError, DdlParseError, ImportError, Result};
pub use options::ImportOptions;
pub use orchestrator::{ImportOutcome, Importer, spawn_import};
pub use progress::{ImportPhase, ImportProgressCallback, ImportProgressSnapshot, progress_channel};
pub use report::{
    CreatedIndex, ForeignKeyRecord, ImportReport, ImportWarning, ImportWarningKind, ImportedTable,
    ReportBuilder, UniqueColumnRecord,
};
pub use schema::{
    IndexKey, IndexKind, SkippedIndexRecord, SourceColumn, SourceDefault, SourceForeignKey,
    SourceIndex, SourceTable,
};
pub use sources::{
    DumpDirectorySource, ImportSource, Introspection, RowStream, SqlDumpSource, SqliteFileSource,
};
pub use target::{CleanupRequest, SqliteTarget, TargetWriter};
pub use value::{SourceRow, SourceValue, Value};
