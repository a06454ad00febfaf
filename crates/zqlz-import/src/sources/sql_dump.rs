//! Single-file SQL dump source (pg_dump plain format, mysqldump)
//!
//! Introspection scans the whole dump once: DDL statements build the tables,
//! while `COPY ... FROM stdin` blocks and `INSERT` statements are only
//! located. Reading a table later re-opens the dump and visits that table's
//! data segments in file order.
//!
//! A compressed dump is decompressed only once: introspection copies the
//! plain text into a temporary spool file, and tables are read from the spool
//! by seeking to their segments.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;

use super::{Introspection, RowSender, RowStream, blocking};
use crate::chunk_reader::Compression;
use crate::ddl_parser::{DdlStatement, apply_constraint, parse_statement};
use crate::error::{ChunkReadError, ImportError, Result};
use crate::options::ImportOptions;
use crate::report::{ImportWarning, ImportWarningKind};
use crate::row_decoder::{DelimitedFormat, RowDecoder};
use crate::schema::SourceTable;
use crate::sql_scanner::{Dialect, ScanItem, StatementScanner, is_copy_terminator};
use crate::value::{SourceRow, SourceValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    Copy,
    Insert,
}

/// One run of a table's rows inside the dump
#[derive(Debug, Clone)]
struct DataSegment {
    offset: u64,
    kind: SegmentKind,
    /// Table column position of each data column, when the data does not
    /// follow the table's column order
    projection: Option<Vec<Option<usize>>>,
    width: usize,
    dialect: Dialect,
}

#[derive(Debug, Clone)]
pub struct SqlDumpSource {
    path: PathBuf,
    compression: Compression,
    /// Keyed by qualified table name; filled by introspection
    segments: HashMap<String, Vec<DataSegment>>,
    /// Decompressed copy of a compressed dump, removed on drop
    spool: Option<Arc<TempPath>>,
}

impl SqlDumpSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            compression: Compression::from_path(&path),
            path,
            segments: HashMap::new(),
            spool: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn introspect(&mut self, options: &ImportOptions) -> Result<Introspection> {
        let path = self.path.clone();
        let compression = self.compression;
        let options = options.clone();
        let (introspection, segments, spool) =
            blocking(move || introspect_dump(&path, compression, &options)).await?;
        self.segments = segments;
        self.spool = spool.map(Arc::new);
        Ok(introspection)
    }

    /// Path of the decompressed spool, once introspection has written it
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool.as_deref().map(|p| &**p)
    }

    pub(crate) fn open_rows(&self, table: &SourceTable, options: &ImportOptions) -> RowStream {
        let label = table.qualified_name();
        let segments = self.segments.get(&label).cloned().unwrap_or_default();
        let spool = self.spool.clone();
        let (path, compression) = match &spool {
            Some(spool) => (spool.to_path_buf(), Compression::None),
            None => (self.path.clone(), self.compression),
        };
        let copy_format = match options.delimited_format(b'\t', b'\\') {
            Ok(format) => format,
            Err(e) if segments.iter().any(|s| s.kind == SegmentKind::Copy) => {
                return RowStream::failed(ChunkReadError::new(label, e.to_string()));
            }
            // INSERT data never goes through the delimited decoder
            Err(_) => DelimitedFormat::default(),
        };
        let column_count = table.columns.len();
        RowStream::spawn(
            label.clone(),
            options.effective_channel_capacity(),
            move |tx| {
                // keeps the spool file alive while this table is read
                let _spool = spool;
                stream_segments(&path, compression, &segments, copy_format, column_count, &label, tx)
            },
        )
    }
}

/// A data statement's target and column list
#[derive(Debug, PartialEq)]
struct DataHeader {
    schema: Option<String>,
    table: String,
    columns: Option<Vec<String>>,
    /// Offset of the first tuple of an INSERT
    values_at: usize,
}

struct PendingSegment {
    header: DataHeader,
    offset: u64,
    kind: SegmentKind,
    dialect: Dialect,
    rows: Option<u64>,
}

fn open_dump(path: &Path, compression: Compression) -> Result<Box<dyn BufRead + Send>> {
    if !path.is_file() {
        return Err(ImportError::SourceNotFound(path.display().to_string()));
    }
    compression
        .open(path)
        .map_err(|e| ImportError::Source(format!("cannot open {}: {}", path.display(), e)))
}

/// Copies everything read from a decompressed dump into the spool file
struct SpoolWriter<R> {
    inner: R,
    spool: File,
}

impl<R: Read> Read for SpoolWriter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.spool.write_all(&buf[..read])?;
        Ok(read)
    }
}

/// Open the dump for the introspection pass. Compressed dumps are teed into a
/// spool file; without one, every table read decompresses from the start.
fn open_for_introspection(
    path: &Path,
    compression: Compression,
) -> Result<(Box<dyn BufRead + Send>, Option<TempPath>)> {
    let reader = open_dump(path, compression)?;
    if compression == Compression::None {
        return Ok((reader, None));
    }
    match tempfile::Builder::new()
        .prefix("zqlz-dump-")
        .suffix(".sql")
        .tempfile()
    {
        Ok(file) => {
            let (spool, spool_path) = file.into_parts();
            tracing::debug!(spool = %spool_path.display(), "spooling decompressed dump");
            let reader: Box<dyn BufRead + Send> = Box::new(BufReader::with_capacity(
                256 * 1024,
                SpoolWriter { inner: reader, spool },
            ));
            Ok((reader, Some(spool_path)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot create spool file; each table will decompress the dump again");
            Ok((reader, None))
        }
    }
}

type DumpLayout = (Introspection, HashMap<String, Vec<DataSegment>>, Option<TempPath>);

fn introspect_dump(path: &Path, compression: Compression, options: &ImportOptions) -> Result<DumpLayout> {
    let (reader, spool) = open_for_introspection(path, compression)?;
    let mut scanner = StatementScanner::new(reader);
    let mut result = Introspection::default();
    let mut tables: Vec<SourceTable> = Vec::new();
    let mut malformed: HashSet<String> = HashSet::new();
    let mut pending: Vec<PendingSegment> = Vec::new();
    let mut copy_header: Option<DataHeader> = None;
    let mut statements = 0u64;

    while let Some(item) = scanner
        .next_item()
        .map_err(|e| ImportError::Source(format!("failed reading {}: {}", path.display(), e)))?
    {
        let statement = match item {
            ScanItem::Statement(statement) => statement,
            ScanItem::CopyData { offset, rows } => {
                if let Some(header) = copy_header.take() {
                    pending.push(PendingSegment {
                        header,
                        offset,
                        kind: SegmentKind::Copy,
                        dialect: Dialect::Postgres,
                        rows: Some(rows),
                    });
                }
                continue;
            }
        };
        statements += 1;

        let keywords = statement.keywords(4);
        match keywords.first().map(String::as_str) {
            Some("CREATE") | Some("ALTER") => {
                let sql = statement.text_lossy();
                match parse_statement(&sql) {
                    Ok(Some(DdlStatement::CreateTable(table))) => {
                        if find_table(&tables, table.schema.as_deref(), &table.name).is_some() {
                            result.warnings.push(ImportWarning::for_table(
                                ImportWarningKind::SchemaParse,
                                table.qualified_name(),
                                "duplicate CREATE TABLE ignored",
                            ));
                        } else {
                            tables.push(table);
                        }
                    }
                    Ok(Some(DdlStatement::CreateIndex(index))) => {
                        match find_table(&tables, index.schema.as_deref(), &index.table) {
                            Some(pos) => tables[pos].indexes.push(index),
                            None => tracing::debug!(index = %index.name, "index on unknown table ignored"),
                        }
                    }
                    Ok(Some(DdlStatement::AlterTable {
                        schema,
                        table,
                        constraints,
                    })) => {
                        let Some(pos) = find_table(&tables, schema.as_deref(), &table) else {
                            continue;
                        };
                        for constraint in constraints {
                            if let Err(column) = apply_constraint(&mut tables[pos], constraint) {
                                result.warnings.push(ImportWarning::for_table(
                                    ImportWarningKind::UnsupportedConstruct,
                                    tables[pos].qualified_name(),
                                    format!("constraint on unknown column '{}' ignored", column),
                                ));
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) if keywords.iter().any(|w| w == "TABLE") && keywords[0] == "CREATE" => {
                        let name = Cursor::new(&statement.text)
                            .create_table_name()
                            .map(|(schema, name)| qualify(schema.as_deref(), &name));
                        match name {
                            Some(name) => {
                                result.warnings.push(ImportWarning::for_table(
                                    ImportWarningKind::SchemaParse,
                                    &name,
                                    format!("table skipped: {}", e),
                                ));
                                malformed.insert(name.to_ascii_lowercase());
                            }
                            None => result.warnings.push(ImportWarning::new(
                                ImportWarningKind::SchemaParse,
                                format!("unreadable CREATE TABLE at byte {}: {}", statement.offset, e),
                            )),
                        }
                    }
                    Err(e) => tracing::debug!(offset = statement.offset, error = %e, "ignoring unparsable statement"),
                }
            }
            Some("INSERT") | Some("REPLACE") => match Cursor::new(&statement.text).insert_header() {
                Some(header) => pending.push(PendingSegment {
                    header,
                    offset: statement.offset,
                    kind: SegmentKind::Insert,
                    dialect: scanner.dialect(),
                    rows: None,
                }),
                None => tracing::debug!(offset = statement.offset, "INSERT without VALUES ignored"),
            },
            Some("COPY") => copy_header = Cursor::new(&statement.text).copy_header(),
            _ => {}
        }
    }

    let segments = resolve_segments(&mut tables, pending, &malformed, &mut result.warnings);

    let schemas: HashSet<Option<&str>> = tables.iter().map(|t| t.schema.as_deref()).collect();
    let single_schema = schemas.len() <= 1;
    let mut by_table = HashMap::new();
    for (mut table, table_segments) in tables.into_iter().zip(segments) {
        let qualified = table.qualified_name();
        if !options.includes_table(&table.name, &qualified) {
            continue;
        }
        let default_target = match (&table.schema, single_schema) {
            (Some(schema), false) => format!("{}_{}", schema, table.name),
            _ => table.name.clone(),
        };
        table.target_name = options.target_name(&table.name, &qualified, &default_target);
        by_table.insert(qualified, table_segments);
        result.tables.push(table);
    }

    tracing::info!(
        path = %path.display(),
        statements,
        tables = result.tables.len(),
        "introspected SQL dump"
    );
    Ok((result, by_table, spool))
}

fn qualify(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", schema, name),
        None => name.to_string(),
    }
}

fn find_table(tables: &[SourceTable], schema: Option<&str>, name: &str) -> Option<usize> {
    tables.iter().position(|t| {
        t.name.eq_ignore_ascii_case(name)
            && match (schema, t.schema.as_deref()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
    })
}

/// Attach located data to tables, building column projections
fn resolve_segments(
    tables: &mut [SourceTable],
    pending: Vec<PendingSegment>,
    malformed: &HashSet<String>,
    warnings: &mut Vec<ImportWarning>,
) -> Vec<Vec<DataSegment>> {
    let mut segments: Vec<Vec<DataSegment>> = vec![Vec::new(); tables.len()];
    let mut copied_rows: Vec<Option<u64>> = vec![Some(0); tables.len()];
    let mut reported: HashSet<String> = HashSet::new();

    for segment in pending {
        let header = &segment.header;
        let Some(pos) = find_table(tables, header.schema.as_deref(), &header.table) else {
            let name = qualify(header.schema.as_deref(), &header.table);
            let key = name.to_ascii_lowercase();
            let known_bad = malformed.contains(&key)
                || malformed.iter().any(|m| m.rsplit('.').next() == Some(key.as_str()));
            if !known_bad && reported.insert(key) {
                warnings.push(ImportWarning::for_table(
                    ImportWarningKind::DataLayout,
                    name,
                    "data for a table with no CREATE TABLE ignored",
                ));
            }
            continue;
        };
        let table = &tables[pos];

        let (projection, width) = match &header.columns {
            None => (None, table.columns.len()),
            Some(columns) => {
                let projection: Vec<Option<usize>> =
                    columns.iter().map(|c| table.column_index(c)).collect();
                for (column, target) in columns.iter().zip(&projection) {
                    if target.is_none()
                        && reported.insert(format!("{}\0{}", table.qualified_name(), column))
                    {
                        warnings.push(
                            ImportWarning::for_table(
                                ImportWarningKind::DataLayout,
                                table.qualified_name(),
                                format!("data column '{}' is not in the table definition; its values are ignored", column),
                            )
                            .with_column(column),
                        );
                    }
                }
                let identity = projection.len() == table.columns.len()
                    && projection.iter().enumerate().all(|(i, p)| *p == Some(i));
                let width = projection.len();
                ((!identity).then_some(projection), width)
            }
        };

        copied_rows[pos] = match (copied_rows[pos], segment.rows) {
            (Some(total), Some(rows)) => Some(total + rows),
            _ => None,
        };
        segments[pos].push(DataSegment {
            offset: segment.offset,
            kind: segment.kind,
            projection,
            width,
            dialect: segment.dialect,
        });
    }

    for (table, rows) in tables.iter_mut().zip(copied_rows) {
        table.row_estimate = rows;
    }
    segments
}

fn open_scanner_at(
    path: &Path,
    compression: Compression,
    offset: u64,
) -> io::Result<StatementScanner<Box<dyn BufRead + Send>>> {
    match compression {
        Compression::None => {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            let reader: Box<dyn BufRead + Send> = Box::new(BufReader::with_capacity(256 * 1024, file));
            Ok(StatementScanner::starting_at(reader, offset, Dialect::default()))
        }
        other => Ok(StatementScanner::new(other.open(path)?)),
    }
}

fn project(row: SourceRow, segment: &DataSegment, column_count: usize) -> SourceRow {
    match &segment.projection {
        None => {
            let mut row = row;
            row.resize(column_count, SourceValue::Null);
            row
        }
        Some(projection) => {
            let mut out = vec![SourceValue::Null; column_count];
            for (value, target) in row.into_iter().zip(projection) {
                if let Some(pos) = target {
                    out[*pos] = value;
                }
            }
            out
        }
    }
}

fn stream_segments(
    path: &Path,
    compression: Compression,
    segments: &[DataSegment],
    copy_format: DelimitedFormat,
    column_count: usize,
    label: &str,
    tx: &RowSender,
) -> std::result::Result<(), ChunkReadError> {
    let Some(first) = segments.first() else {
        return Ok(());
    };
    let io_err = |e: io::Error| ChunkReadError::new(label, format!("failed reading {}: {}", path.display(), e));

    let mut scanner = open_scanner_at(path, compression, first.offset).map_err(io_err)?;
    let mut line = Vec::new();
    let mut rows = 0u64;

    for segment in segments {
        scanner.skip_to(segment.offset).map_err(io_err)?;
        match segment.kind {
            SegmentKind::Copy => {
                let decoder = RowDecoder::new(copy_format, segment.width);
                loop {
                    if !scanner.read_line(&mut line).map_err(io_err)? {
                        return Err(ChunkReadError::new(label, "COPY data ends without a \\. terminator"));
                    }
                    if is_copy_terminator(&line) {
                        break;
                    }
                    if !tx.send(project(decoder.decode_line(&line), segment, column_count)) {
                        return Ok(());
                    }
                    rows += 1;
                }
            }
            SegmentKind::Insert => {
                scanner.set_dialect(segment.dialect);
                let Some(ScanItem::Statement(statement)) = scanner.next_item().map_err(io_err)? else {
                    return Err(ChunkReadError::new(
                        label,
                        format!("expected an INSERT statement at byte {}", segment.offset),
                    ));
                };
                let header = Cursor::new(&statement.text).insert_header().ok_or_else(|| {
                    ChunkReadError::new(label, format!("expected an INSERT statement at byte {}", segment.offset))
                })?;
                let backslash_escapes = segment.dialect == Dialect::MySql;
                let mut consumer_gone = false;
                parse_tuples(&statement.text[header.values_at..], backslash_escapes, |row| {
                    if tx.send(project(row, segment, column_count)) {
                        rows += 1;
                        true
                    } else {
                        consumer_gone = true;
                        false
                    }
                })
                .map_err(|message| {
                    ChunkReadError::new(label, format!("bad INSERT at byte {}: {}", segment.offset, message))
                })?;
                if consumer_gone {
                    return Ok(());
                }
            }
        }
    }
    tracing::debug!(table = %label, rows, segments = segments.len(), "finished reading dump data");
    Ok(())
}

/// Byte cursor over statement headers
struct Cursor<'a> {
    text: &'a [u8],
    pos: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

impl<'a> Cursor<'a> {
    fn new(text: &'a [u8]) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_ws(&mut self) {
        while self.text.get(self.pos).is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.text.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let end = self.pos + keyword.len();
        let matches = self
            .text
            .get(self.pos..end)
            .is_some_and(|w| w.eq_ignore_ascii_case(keyword.as_bytes()))
            && !self.text.get(end).copied().is_some_and(is_word_byte);
        if matches {
            self.pos = end;
        }
        matches
    }

    fn identifier(&mut self) -> Option<String> {
        let open = self.peek()?;
        let close = match open {
            b'`' => b'`',
            b'"' => b'"',
            b'[' => b']',
            _ => {
                let start = self.pos;
                while self.text.get(self.pos).copied().is_some_and(is_word_byte) {
                    self.pos += 1;
                }
                return (self.pos > start)
                    .then(|| String::from_utf8_lossy(&self.text[start..self.pos]).into_owned());
            }
        };
        self.pos += 1;
        let mut name = Vec::new();
        loop {
            let b = *self.text.get(self.pos)?;
            self.pos += 1;
            if b == close {
                if close != b']' && self.text.get(self.pos) == Some(&close) {
                    name.push(close);
                    self.pos += 1;
                    continue;
                }
                return Some(String::from_utf8_lossy(&name).into_owned());
            }
            name.push(b);
        }
    }

    fn qualified_name(&mut self) -> Option<(Option<String>, String)> {
        let first = self.identifier()?;
        if self.text.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            let second = self.identifier()?;
            return Some((Some(first), second));
        }
        Some((None, first))
    }

    fn column_list(&mut self) -> Option<Option<Vec<String>>> {
        if !self.eat(b'(') {
            return Some(None);
        }
        let mut columns = Vec::new();
        loop {
            columns.push(self.identifier()?);
            if self.eat(b')') {
                return Some(Some(columns));
            }
            if !self.eat(b',') {
                return None;
            }
        }
    }

    /// `INSERT [modifiers] [INTO] name [(cols)] VALUES`
    fn insert_header(mut self) -> Option<DataHeader> {
        if !self.eat_keyword("INSERT") && !self.eat_keyword("REPLACE") {
            return None;
        }
        for modifier in ["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"] {
            self.eat_keyword(modifier);
        }
        self.eat_keyword("INTO");
        let (schema, table) = self.qualified_name()?;
        let columns = self.column_list()?;
        if !self.eat_keyword("VALUES") && !self.eat_keyword("VALUE") {
            return None;
        }
        Some(DataHeader {
            schema,
            table,
            columns,
            values_at: self.pos,
        })
    }

    /// `COPY name [(cols)] FROM stdin`
    fn copy_header(mut self) -> Option<DataHeader> {
        if !self.eat_keyword("COPY") {
            return None;
        }
        let (schema, table) = self.qualified_name()?;
        let columns = self.column_list()?;
        if !self.eat_keyword("FROM") || !self.eat_keyword("STDIN") {
            return None;
        }
        Some(DataHeader {
            schema,
            table,
            columns,
            values_at: self.pos,
        })
    }

    fn create_table_name(mut self) -> Option<(Option<String>, String)> {
        if !self.eat_keyword("CREATE") {
            return None;
        }
        while !self.eat_keyword("TABLE") {
            self.identifier()?;
        }
        if self.eat_keyword("IF") {
            self.eat_keyword("NOT");
            self.eat_keyword("EXISTS");
        }
        self.qualified_name()
    }
}

/// Parse `(v, ...), (v, ...)` tuples, handing each row to `emit` until it
/// returns `false`. Text after the last tuple (`ON DUPLICATE KEY ...`) is
/// ignored.
fn parse_tuples(
    text: &[u8],
    backslash_escapes: bool,
    mut emit: impl FnMut(SourceRow) -> bool,
) -> std::result::Result<(), String> {
    let mut cursor = Cursor::new(text);
    loop {
        if !cursor.eat(b'(') {
            return match cursor.peek() {
                None => Ok(()),
                Some(b) => Err(format!("expected '(' but found '{}'", b as char)),
            };
        }
        let mut row = Vec::new();
        if !cursor.eat(b')') {
            loop {
                row.push(tuple_value(&mut cursor, backslash_escapes)?);
                if cursor.eat(b')') {
                    break;
                }
                if !cursor.eat(b',') {
                    return Err(format!("unterminated tuple at byte {}", cursor.pos));
                }
            }
        }
        if !emit(row) {
            return Ok(());
        }
        if !cursor.eat(b',') {
            return Ok(());
        }
    }
}

fn tuple_value(cursor: &mut Cursor<'_>, backslash_escapes: bool) -> std::result::Result<SourceValue, String> {
    let b = cursor
        .peek()
        .ok_or_else(|| "unexpected end of VALUES".to_string())?;
    let text = cursor.text;
    let next = text.get(cursor.pos + 1).copied();

    match b {
        b'\'' | b'"' => quoted(cursor, backslash_escapes).map(SourceValue::Text),
        b'x' | b'X' if next == Some(b'\'') => {
            cursor.pos += 1;
            let digits = quoted(cursor, false)?;
            decode_hex(&digits).map(SourceValue::Blob)
        }
        b'0' if matches!(next, Some(b'x') | Some(b'X')) => {
            let start = cursor.pos + 2;
            let mut end = start;
            while text.get(end).is_some_and(|b| b.is_ascii_hexdigit()) {
                end += 1;
            }
            cursor.pos = end;
            decode_hex(&text[start..end]).map(SourceValue::Blob)
        }
        b'b' | b'B' if next == Some(b'\'') => {
            cursor.pos += 1;
            let bits = quoted(cursor, false)?;
            bits.iter()
                .try_fold(0i64, |acc, bit| match bit {
                    b'0' | b'1' => Ok((acc << 1) | i64::from(bit - b'0')),
                    _ => Err(format!("invalid bit literal digit '{}'", *bit as char)),
                })
                .map(SourceValue::Integer)
        }
        b'_' => {
            let charset = cursor
                .identifier()
                .ok_or_else(|| "expected charset introducer".to_string())?;
            if !matches!(cursor.peek(), Some(b'\'') | Some(b'"') | Some(b'x') | Some(b'X') | Some(b'0')) {
                return Ok(SourceValue::Text(charset.into_bytes()));
            }
            let value = tuple_value(cursor, backslash_escapes)?;
            Ok(match (charset.eq_ignore_ascii_case("_binary"), value) {
                (true, SourceValue::Text(bytes)) => SourceValue::Blob(bytes),
                (_, value) => value,
            })
        }
        b'-' | b'+' | b'.' | b'0'..=b'9' => {
            let start = cursor.pos;
            cursor.pos += 1;
            while text
                .get(cursor.pos)
                .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
            {
                cursor.pos += 1;
            }
            Ok(SourceValue::Text(text[start..cursor.pos].to_vec()))
        }
        _ => {
            let start = cursor.pos;
            let word = cursor
                .identifier()
                .ok_or_else(|| format!("unexpected '{}' in VALUES", b as char))?;
            if word.eq_ignore_ascii_case("NULL") {
                return Ok(SourceValue::Null);
            }
            if word.eq_ignore_ascii_case("TRUE") {
                return Ok(SourceValue::Integer(1));
            }
            if word.eq_ignore_ascii_case("FALSE") {
                return Ok(SourceValue::Integer(0));
            }
            // function call such as ST_GeomFromText('...'): keep its text
            if cursor.text.get(cursor.pos) == Some(&b'(') {
                let mut depth = 0usize;
                while let Some(&b) = cursor.text.get(cursor.pos) {
                    cursor.pos += 1;
                    match b {
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        b'\'' | b'"' => {
                            cursor.pos -= 1;
                            quoted(cursor, backslash_escapes)?;
                        }
                        _ => {}
                    }
                }
                return Ok(SourceValue::Text(text[start..cursor.pos].to_vec()));
            }
            Ok(SourceValue::Text(word.into_bytes()))
        }
    }
}

/// A quoted string starting at the cursor, with escapes resolved
fn quoted(cursor: &mut Cursor<'_>, backslash_escapes: bool) -> std::result::Result<Vec<u8>, String> {
    let text = cursor.text;
    let quote = text[cursor.pos];
    let mut pos = cursor.pos + 1;
    let mut out = Vec::new();
    loop {
        let Some(&b) = text.get(pos) else {
            return Err("unterminated string".into());
        };
        pos += 1;
        if b == quote {
            if text.get(pos) == Some(&quote) {
                out.push(quote);
                pos += 1;
                continue;
            }
            cursor.pos = pos;
            return Ok(out);
        }
        if b == b'\\' && backslash_escapes {
            let Some(&escaped) = text.get(pos) else {
                return Err("unterminated string".into());
            };
            pos += 1;
            match escaped {
                b'0' => out.push(0),
                b'n' => out.push(b'\n'),
                b'r' => out.push(b'\r'),
                b't' => out.push(b'\t'),
                b'b' => out.push(0x08),
                b'Z' => out.push(0x1a),
                // LIKE wildcards keep their backslash
                b'%' | b'_' => out.extend_from_slice(&[b'\\', escaped]),
                other => out.push(other),
            }
            continue;
        }
        out.push(b);
    }
}

fn decode_hex(digits: &[u8]) -> std::result::Result<Vec<u8>, String> {
    if digits.len() % 2 != 0 {
        return Err("hex literal has an odd number of digits".into());
    }
    let nibble = |d: u8| match d {
        b'0'..=b'9' => Ok(d - b'0'),
        b'a'..=b'f' => Ok(d - b'a' + 10),
        b'A'..=b'F' => Ok(d - b'A' + 10),
        _ => Err(format!("invalid hex digit '{}'", d as char)),
    };
    digits
        .chunks(2)
        .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}
