//! Logical dump directory source (MySQL Shell `util.dumpInstance` layout)
//!
//! ```text
//! @.json                   instance manifest: schemas, basenames
//! @.done.json              written when the dump finished
//! <schema>.json            schema manifest: tables, basenames
//! <schema>@<table>.json    table metadata: delimiters, columns, compression
//! <schema>@<table>.sql     table DDL
//! <schema>@<table>@0.tsv.zst, ..., <schema>@<table>@@<n>.tsv.zst
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Introspection, RowSender, RowStream, blocking};
use crate::chunk_reader::{ChunkLineReader, Compression, discover_chunks, validate_chunks};
use crate::ddl_parser::{DdlStatement, apply_constraint, parse_statement};
use crate::error::{ChunkReadError, ImportError, Result};
use crate::options::ImportOptions;
use crate::report::{ImportWarning, ImportWarningKind};
use crate::row_decoder::{DelimitedFormat, RowDecoder};
use crate::schema::SourceTable;
use crate::sql_scanner::{ScanItem, StatementScanner};

const MANIFEST: &str = "@.json";
const DONE_MARKER: &str = "@.done.json";

#[derive(Debug, Deserialize)]
struct InstanceManifest {
    #[serde(default)]
    schemas: Vec<String>,
    #[serde(default)]
    basenames: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SchemaManifest {
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    basenames: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataOptions {
    fields_terminated_by: Option<String>,
    fields_escaped_by: Option<String>,
    fields_enclosed_by: Option<String>,
    lines_terminated_by: Option<String>,
    columns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TableMetadata {
    #[serde(default)]
    options: DataOptions,
    compression: Option<String>,
    extension: Option<String>,
    #[serde(default)]
    chunking: bool,
}

/// Where and how one table's data is stored
#[derive(Debug, Clone)]
struct TableLayout {
    basename: String,
    compression: Compression,
    extension: String,
    chunking: bool,
    delimiter: u8,
    escape: u8,
}

#[derive(Debug, Clone)]
pub struct DumpDirectorySource {
    root: PathBuf,
    /// Keyed by qualified table name; filled by introspection
    layouts: HashMap<String, TableLayout>,
}

impl DumpDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            layouts: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub(crate) async fn introspect(&mut self, options: &ImportOptions) -> Result<Introspection> {
        let root = self.root.clone();
        let options = options.clone();
        let (introspection, layouts) = blocking(move || introspect_dump(&root, &options)).await?;
        self.layouts = layouts;
        Ok(introspection)
    }

    pub(crate) fn open_rows(&self, table: &SourceTable, options: &ImportOptions) -> RowStream {
        let label = table.qualified_name();
        let Some(layout) = self.layouts.get(&label).cloned() else {
            return RowStream::failed(ChunkReadError::new(label, "table was not introspected"));
        };
        let root = self.root.clone();
        let format = match options.delimited_format(layout.delimiter, layout.escape) {
            Ok(format) => format,
            Err(e) => return RowStream::failed(ChunkReadError::new(label, e.to_string())),
        };
        let column_count = table.columns.len();
        RowStream::spawn(
            label.clone(),
            options.effective_channel_capacity(),
            move |tx| stream_table(&root, &layout, format, column_count, &label, tx),
        )
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> std::result::Result<T, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {}", display_name(path), e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid {}: {}", display_name(path), e))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn introspect_dump(
    root: &Path,
    options: &ImportOptions,
) -> Result<(Introspection, HashMap<String, TableLayout>)> {
    let manifest_path = root.join(MANIFEST);
    if !root.is_dir() || !manifest_path.is_file() {
        return Err(ImportError::SourceNotFound(manifest_path.display().to_string()));
    }
    let manifest: InstanceManifest = read_json(&manifest_path).map_err(ImportError::Source)?;

    let mut result = Introspection::default();
    let mut layouts = HashMap::new();

    if !root.join(DONE_MARKER).is_file() {
        result.warnings.push(ImportWarning::new(
            ImportWarningKind::DataLayout,
            format!("{} not found; the dump may be incomplete", DONE_MARKER),
        ));
    }

    let single_schema = manifest.schemas.len() == 1;
    for schema in &manifest.schemas {
        let schema_base = manifest
            .basenames
            .get(schema)
            .cloned()
            .unwrap_or_else(|| schema.clone());
        let (tables, table_basenames) = schema_tables(root, schema, &schema_base, &mut result.warnings)?;

        for table_name in tables {
            let qualified = format!("{}.{}", schema, table_name);
            if !options.includes_table(&table_name, &qualified) {
                continue;
            }
            let basename = table_basenames
                .get(&table_name)
                .cloned()
                .unwrap_or_else(|| format!("{}@{}", schema_base, table_name));

            match read_table(root, schema, &table_name, &basename, &mut result.warnings) {
                Ok((mut table, layout)) => {
                    let default_target = if single_schema {
                        table_name.clone()
                    } else {
                        format!("{}_{}", schema, table_name)
                    };
                    table.target_name = options.target_name(&table_name, &qualified, &default_target);
                    tracing::debug!(
                        table = %qualified,
                        columns = table.columns.len(),
                        compression = ?layout.compression,
                        chunking = layout.chunking,
                        "introspected dump table"
                    );
                    layouts.insert(qualified, layout);
                    result.tables.push(table);
                }
                Err(message) => result.warnings.push(ImportWarning::for_table(
                    ImportWarningKind::SchemaParse,
                    qualified,
                    format!("table skipped: {}", message),
                )),
            }
        }
    }

    tracing::info!(
        root = %root.display(),
        schemas = manifest.schemas.len(),
        tables = result.tables.len(),
        "introspected dump directory"
    );
    Ok((result, layouts))
}

/// Tables of one schema, from its manifest or, failing that, from the
/// per-table metadata files present in the directory
fn schema_tables(
    root: &Path,
    schema: &str,
    schema_base: &str,
    warnings: &mut Vec<ImportWarning>,
) -> Result<(Vec<String>, HashMap<String, String>)> {
    let path = root.join(format!("{}.json", schema_base));
    if path.is_file() {
        match read_json::<SchemaManifest>(&path) {
            Ok(manifest) => return Ok((manifest.tables, manifest.basenames)),
            Err(message) => warnings.push(ImportWarning::new(ImportWarningKind::DataLayout, message)),
        }
    } else {
        warnings.push(ImportWarning::new(
            ImportWarningKind::DataLayout,
            format!(
                "schema metadata {} not found; tables of '{}' discovered from file names",
                display_name(&path),
                schema
            ),
        ));
    }

    let prefix = format!("{}@", schema_base);
    let mut tables = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let file_name = entry?.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(table) = name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(".json"))
            && !table.is_empty()
            && !table.contains('@')
        {
            tables.push(table.to_string());
        }
    }
    tables.sort();
    Ok((tables, HashMap::new()))
}

fn single_byte(value: Option<&str>, default: u8, what: &str) -> std::result::Result<u8, String> {
    match value {
        None => Ok(default),
        Some(s) if s.len() == 1 => Ok(s.as_bytes()[0]),
        Some(s) => Err(format!("{} {:?} is not a single byte", what, s)),
    }
}

fn read_table(
    root: &Path,
    schema: &str,
    name: &str,
    basename: &str,
    warnings: &mut Vec<ImportWarning>,
) -> std::result::Result<(SourceTable, TableLayout), String> {
    let qualified = format!("{}.{}", schema, name);
    let metadata: TableMetadata = read_json(&root.join(format!("{}.json", basename)))?;
    let data = &metadata.options;

    let compression = match metadata.compression.as_deref() {
        None => Compression::None,
        Some(codec) => {
            Compression::from_name(codec).ok_or_else(|| format!("unsupported compression '{}'", codec))?
        }
    };
    let extension = metadata
        .extension
        .clone()
        .unwrap_or_else(|| compression.default_data_extension().to_string());
    let delimiter = single_byte(data.fields_terminated_by.as_deref(), b'\t', "field delimiter")?;
    let escape = match data.fields_escaped_by.as_deref() {
        Some("") => return Err("data written without an escape character is not supported".into()),
        other => single_byte(other, b'\\', "escape character")?,
    };
    if data.fields_enclosed_by.as_deref().is_some_and(|s| !s.is_empty()) {
        return Err("enclosed fields are not supported".into());
    }
    if data.lines_terminated_by.as_deref().is_some_and(|s| s != "\n") {
        return Err("only newline-terminated rows are supported".into());
    }

    let mut table = parse_ddl_fragment(&root.join(format!("{}.sql", basename)), &qualified, warnings)?;
    table.name = name.to_string();
    table.schema = Some(schema.to_string());
    for index in &mut table.indexes {
        index.table = name.to_string();
    }

    if let Some(columns) = &data.columns {
        let dropped = table
            .reorder_columns(columns)
            .map_err(|column| format!("data column '{}' is not defined by the DDL", column))?;
        if !dropped.is_empty() {
            warnings.push(ImportWarning::for_table(
                ImportWarningKind::DataLayout,
                &qualified,
                format!(
                    "columns not present in the data files were dropped: {}",
                    dropped.join(", ")
                ),
            ));
        }
    }

    match discover_chunks(root, basename, &extension) {
        Ok(chunks) if chunks.is_empty() => warnings.push(ImportWarning::for_table(
            ImportWarningKind::DataLayout,
            &qualified,
            "no data files found; the table will be empty",
        )),
        Ok(_) => {}
        Err(e) => tracing::debug!(table = %qualified, error = %e, "data files not listed"),
    }

    let layout = TableLayout {
        basename: basename.to_string(),
        compression,
        extension,
        chunking: metadata.chunking,
        delimiter,
        escape,
    };
    Ok((table, layout))
}

/// The `CREATE TABLE` of a table's DDL file, with any `ALTER TABLE` and
/// `CREATE INDEX` statements that follow it applied
fn parse_ddl_fragment(
    path: &Path,
    qualified: &str,
    warnings: &mut Vec<ImportWarning>,
) -> std::result::Result<SourceTable, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {}", display_name(path), e))?;
    let mut scanner = StatementScanner::new(bytes.as_slice());

    let mut table: Option<SourceTable> = None;
    let mut later = Vec::new();
    while let Some(item) = scanner
        .next_item()
        .map_err(|e| format!("cannot scan {}: {}", display_name(path), e))?
    {
        let ScanItem::Statement(statement) = item else {
            continue;
        };
        let sql = statement.text_lossy();
        match parse_statement(&sql) {
            Ok(Some(DdlStatement::CreateTable(parsed))) if table.is_none() => table = Some(parsed),
            Ok(Some(other)) => later.push(other),
            Ok(None) => {}
            Err(e) if table.is_none() && statement.keywords(4).iter().any(|w| w == "TABLE") => {
                return Err(format!("malformed DDL: {}", e));
            }
            Err(e) => tracing::debug!(table = %qualified, error = %e, "ignoring unparsable statement"),
        }
    }

    let mut table = table.ok_or_else(|| format!("{} contains no CREATE TABLE", display_name(path)))?;
    for statement in later {
        match statement {
            DdlStatement::CreateIndex(index) => table.indexes.push(index),
            DdlStatement::AlterTable { constraints, .. } => {
                for constraint in constraints {
                    if let Err(column) = apply_constraint(&mut table, constraint) {
                        warnings.push(ImportWarning::for_table(
                            ImportWarningKind::UnsupportedConstruct,
                            qualified,
                            format!("constraint on unknown column '{}' ignored", column),
                        ));
                    }
                }
            }
            DdlStatement::CreateTable(_) => {}
        }
    }
    Ok(table)
}

fn stream_table(
    root: &Path,
    layout: &TableLayout,
    format: DelimitedFormat,
    column_count: usize,
    label: &str,
    tx: &RowSender,
) -> std::result::Result<(), ChunkReadError> {
    let chunks = discover_chunks(root, &layout.basename, &layout.extension)
        .map_err(|e| ChunkReadError::new(label, format!("cannot list data files: {}", e)))?;
    validate_chunks(label, &chunks, layout.chunking)?;

    let decoder = RowDecoder::new(format, column_count);
    let mut reader = ChunkLineReader::new(label, chunks, layout.compression);
    let mut line = Vec::new();
    let mut rows = 0u64;
    while reader.next_line(&mut line)? {
        if !tx.send(decoder.decode_line(&line)) {
            tracing::debug!(table = %label, rows, "row consumer closed; stopping reader");
            return Ok(());
        }
        rows += 1;
    }
    tracing::debug!(table = %label, rows, chunks = reader.chunks_opened(), "finished reading table data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SourceValue;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn zstd_chunk(lines: &str) -> Vec<u8> {
        zstd::stream::encode_all(lines.as_bytes(), 0).unwrap()
    }

    fn dump() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "@.json", br#"{"schemas": ["shop"], "basenames": {"shop": "shop"}}"#);
        write(root, "@.done.json", b"{}");
        write(
            root,
            "shop.json",
            br#"{"tables": ["items", "broken"], "basenames": {"items": "shop@items", "broken": "shop@broken"}}"#,
        );
        write(
            root,
            "shop@items.json",
            br#"{
                "options": {
                    "fieldsTerminatedBy": "\t",
                    "fieldsEscapedBy": "\\",
                    "columns": ["id", "name", "price"]
                },
                "compression": "zstd",
                "extension": "tsv.zst",
                "chunking": true
            }"#,
        );
        write(
            root,
            "shop@items.sql",
            indoc! {b"
                -- MySQLShell dump
                /*!40101 SET NAMES utf8mb4 */;
                CREATE TABLE IF NOT EXISTS `items` (
                  `id` int NOT NULL AUTO_INCREMENT,
                  `name` varchar(64) NOT NULL,
                  `price` decimal(10,2) DEFAULT NULL,
                  `label` varchar(80) GENERATED ALWAYS AS (upper(`name`)) VIRTUAL,
                  PRIMARY KEY (`id`),
                  KEY `idx_name` (`name`)
                ) ENGINE=InnoDB;
            "},
        );
        write(root, "shop@items@0.tsv.zst", &zstd_chunk("1\tlamp\t9.50\n2\tdesk\t\\N\n"));
        write(root, "shop@items@@1.tsv.zst", &zstd_chunk("3\tchair\\ttall\t20.00\n"));

        write(root, "shop@broken.json", br#"{"options": {}, "compression": "none"}"#);
        write(root, "shop@broken.sql", b"CREATE TABLE `broken` (`id` int,;\n");
        dir
    }

    #[tokio::test]
    async fn test_introspects_and_skips_malformed_table() {
        let dir = dump();
        let mut source = DumpDirectorySource::new(dir.path());
        let result = source.introspect(&ImportOptions::default()).await.unwrap();

        assert_eq!(result.tables.len(), 1);
        let items = &result.tables[0];
        assert_eq!(items.qualified_name(), "shop.items");
        assert_eq!(items.target_name, "items");
        assert_eq!(items.column_names(), vec!["id", "name", "price"]);
        assert_eq!(items.primary_key, vec!["id"]);
        assert_eq!(items.indexes.len(), 1);

        let skipped: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.kind == ImportWarningKind::SchemaParse)
            .collect();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].table.as_deref(), Some("shop.broken"));

        assert!(result.warnings.iter().any(|w| {
            w.kind == ImportWarningKind::DataLayout && w.message.contains("label")
        }));
    }

    #[tokio::test]
    async fn test_streams_chunks_in_order() {
        let dir = dump();
        let mut source = DumpDirectorySource::new(dir.path());
        let result = source.introspect(&ImportOptions::default()).await.unwrap();

        let mut stream = source.open_rows(&result.tables[0], &ImportOptions::default());
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            rows.push(row.unwrap());
        }
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][2], SourceValue::Null);
        assert_eq!(rows[2][1], SourceValue::text("chair\ttall"));
    }

    #[tokio::test]
    async fn test_missing_final_chunk_fails_the_table_stream() {
        let dir = dump();
        std::fs::remove_file(dir.path().join("shop@items@@1.tsv.zst")).unwrap();
        let mut source = DumpDirectorySource::new(dir.path());
        let result = source.introspect(&ImportOptions::default()).await.unwrap();

        let mut stream = source.open_rows(&result.tables[0], &ImportOptions::default());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.message.contains("final chunk missing"), "{}", err);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DumpDirectorySource::new(dir.path());
        let err = source
            .introspect(&ImportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::SourceNotFound(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_tables_discovered_without_schema_manifest() {
        let dir = dump();
        std::fs::remove_file(dir.path().join("shop.json")).unwrap();
        std::fs::remove_file(dir.path().join("@.done.json")).unwrap();
        let mut source = DumpDirectorySource::new(dir.path());
        let result = source.introspect(&ImportOptions::default()).await.unwrap();

        assert_eq!(result.tables.len(), 1);
        let layout_warnings = result
            .warnings
            .iter()
            .filter(|w| w.kind == ImportWarningKind::DataLayout && w.table.is_none())
            .count();
        assert_eq!(layout_warnings, 2);
    }

    #[tokio::test]
    async fn test_multi_schema_target_names() {
        let dir = dump();
        write(dir.path(), "@.json", br#"{"schemas": ["shop", "crm"]}"#);
        write(dir.path(), "crm.json", br#"{"tables": []}"#);
        let mut source = DumpDirectorySource::new(dir.path());
        let options = ImportOptions::default().with_table_mapping("shop.items", "catalog");
        let result = source.introspect(&options).await.unwrap();
        assert_eq!(result.tables[0].target_name, "catalog");

        let result = source.introspect(&ImportOptions::default()).await.unwrap();
        assert_eq!(result.tables[0].target_name, "shop_items");
    }
}
