//! Embedded-file source: a SQLite database opened read-only

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{Introspection, RowSender, RowStream, blocking};
use crate::ddl_parser::{classify_default, parse_create_index, parse_create_table};
use crate::error::{ChunkReadError, ImportError, Result};
use crate::options::ImportOptions;
use crate::report::{ImportWarning, ImportWarningKind};
use crate::schema::{IndexKey, SourceColumn, SourceForeignKey, SourceIndex, SourceTable};
use crate::synthesizer::quote_identifier;
use crate::value::SourceValue;

#[derive(Debug, Clone)]
pub struct SqliteFileSource {
    path: PathBuf,
}

impl SqliteFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) async fn introspect(&mut self, options: &ImportOptions) -> Result<Introspection> {
        let path = self.path.clone();
        let options = options.clone();
        blocking(move || introspect_file(&path, &options)).await
    }

    pub(crate) fn open_rows(&self, table: &SourceTable, options: &ImportOptions) -> RowStream {
        let path = self.path.clone();
        let name = table.name.clone();
        let columns = table.column_names();
        let label = table.qualified_name();
        RowStream::spawn(
            label.clone(),
            options.effective_channel_capacity(),
            move |tx| stream_table(&path, &name, &columns, &label, tx),
        )
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(ImportError::SourceNotFound(path.display().to_string()));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ImportError::Source(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(conn)
}

fn introspect_file(path: &Path, options: &ImportOptions) -> Result<Introspection> {
    let conn = open_read_only(path)?;

    let entries: Vec<(String, Option<String>)> = conn
        .prepare(
            "SELECT name, sql FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY rowid",
        )
        .and_then(|mut stmt| {
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows
        })
        .map_err(|e| ImportError::Source(format!("{} is not a readable SQLite database: {}", path.display(), e)))?;

    let mut result = Introspection::default();
    for (name, sql) in entries {
        if !options.includes_table(&name, &name) {
            continue;
        }
        let sql = sql.unwrap_or_default();
        if sql
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("CREATE VIRTUAL TABLE")
        {
            result.warnings.push(ImportWarning::for_table(
                ImportWarningKind::SchemaParse,
                &name,
                "virtual tables are not imported",
            ));
            continue;
        }

        match read_table(&conn, &name, &sql) {
            Ok(mut table) => {
                table.target_name = options.target_name(&name, &name, &name);
                tracing::debug!(table = %name, columns = table.columns.len(), "introspected table");
                result.tables.push(table);
            }
            Err(e) => result.warnings.push(ImportWarning::for_table(
                ImportWarningKind::SchemaParse,
                &name,
                format!("table skipped: {}", e),
            )),
        }
    }

    tracing::info!(path = %path.display(), tables = result.tables.len(), "introspected SQLite file");
    Ok(result)
}

fn read_table(conn: &Connection, name: &str, create_sql: &str) -> Result<SourceTable> {
    let mut table = SourceTable::new(name);

    let mut pk_positions: Vec<(i64, String)> = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let mut rows = stmt.query(params![name])?;
    while let Some(row) = rows.next()? {
        let column_name: String = row.get(0)?;
        let declared_type: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
        let mut column = SourceColumn::new(column_name.clone(), declared_type);
        column.not_null = row.get::<_, i64>(2)? != 0;
        column.default = row
            .get::<_, Option<String>>(3)?
            .map(|text| classify_default(&text));
        let pk: i64 = row.get(4)?;
        if pk > 0 {
            pk_positions.push((pk, column_name));
        }
        table.columns.push(column);
    }
    if table.columns.is_empty() {
        return Err(ImportError::SchemaParse {
            table: name.to_string(),
            message: "no columns".into(),
        });
    }

    pk_positions.sort();
    let pk: Vec<String> = pk_positions.into_iter().map(|(_, c)| c).collect();
    table
        .set_primary_key(&pk)
        .map_err(|column| ImportError::SchemaParse {
            table: name.to_string(),
            message: format!("primary key names unknown column '{}'", column),
        })?;

    read_indexes(conn, &mut table)?;
    read_foreign_keys(conn, &mut table)?;

    // CHECK constraints and generated columns are only visible in the DDL text
    match parse_create_table(create_sql) {
        Ok(parsed) => table.dropped_constructs = parsed.dropped_constructs,
        Err(e) => tracing::debug!(table = %name, error = %e, "table DDL not parsed"),
    }

    let count_sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(name));
    table.row_estimate = conn
        .query_row(&count_sql, [], |row| row.get::<_, i64>(0))
        .ok()
        .map(|n| n.max(0) as u64);

    Ok(table)
}

fn read_indexes(conn: &Connection, table: &mut SourceTable) -> Result<()> {
    // pragma_index_list is newest first; report indexes in creation order
    let mut list = conn.prepare(
        "SELECT il.name, il.\"unique\", il.origin, il.partial \
         FROM pragma_index_list(?1) AS il \
         LEFT JOIN sqlite_master AS m ON m.type = 'index' AND m.name = il.name \
         ORDER BY m.rowid",
    )?;
    let entries: Vec<(String, bool, String, bool)> = list
        .query_map(params![table.name], |row| {
            Ok((
                row.get(0)?,
                row.get::<_, i64>(1)? != 0,
                row.get(2)?,
                row.get::<_, i64>(3)? != 0,
            ))
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut info = conn.prepare("SELECT cid, name FROM pragma_index_info(?1) ORDER BY seqno")?;
    for (index_name, unique, origin, partial) in entries {
        let keys: Vec<IndexKey> = info
            .query_map(params![index_name], |row| {
                let cid: i64 = row.get(0)?;
                let column: Option<String> = row.get(1)?;
                Ok(match (cid, column) {
                    (-2, _) | (_, None) => IndexKey::Expression("<expression>".into()),
                    (_, Some(name)) => IndexKey::Column {
                        name,
                        prefix_length: None,
                    },
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        match origin.as_str() {
            "pk" => {}
            "u" if keys.len() == 1 => {
                if let Some(IndexKey::Column { name, .. }) = keys.first() {
                    let name = name.clone();
                    table.mark_unique(&name);
                }
            }
            _ => {
                let index = index_from_sql(conn, &index_name, &table.name).unwrap_or_else(|| {
                    let mut index = SourceIndex::new(index_name.clone(), table.name.clone(), keys);
                    index.unique = unique;
                    if partial {
                        index.predicate = Some("<partial>".into());
                    }
                    index
                });
                table.indexes.push(index);
            }
        }
    }
    Ok(())
}

/// The index's own CREATE INDEX text carries expression and predicate text
fn index_from_sql(conn: &Connection, index_name: &str, table: &str) -> Option<SourceIndex> {
    let sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![index_name],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()
        .flatten();
    let mut index = parse_create_index(&sql?).ok()?;
    index.table = table.to_string();
    Some(index)
}

fn read_foreign_keys(conn: &Connection, table: &mut SourceTable) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq")?;
    let keys = stmt
        .query_map(params![table.name], |row| {
            Ok(SourceForeignKey {
                referenced_table: row.get(0)?,
                column: row.get(1)?,
                referenced_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    table.foreign_keys = keys;
    Ok(())
}

fn stream_table(
    path: &Path,
    name: &str,
    columns: &[String],
    label: &str,
    tx: &RowSender,
) -> std::result::Result<(), ChunkReadError> {
    let err = |e: &dyn std::fmt::Display| ChunkReadError::new(label, e.to_string());

    let conn = open_read_only(path).map_err(|e| err(&e))?;
    let select = format!(
        "SELECT {} FROM {}",
        columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
        quote_identifier(name)
    );
    let mut stmt = conn.prepare(&select).map_err(|e| err(&e))?;
    let mut rows = stmt.query([]).map_err(|e| err(&e))?;

    while let Some(row) = rows.next().map_err(|e| err(&e))? {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            let value = row.get_ref(idx).map_err(|e| err(&e))?;
            values.push(SourceValue::from(value));
        }
        if !tx.send(values) {
            tracing::debug!(table = %label, "row consumer closed; stopping reader");
            return Ok(());
        }
    }
    Ok(())
}
