//! Target DDL synthesis
//!
//! Turns a [`SourceTable`] into a `CREATE TABLE` statement and a list of
//! single-column `CREATE INDEX` statements. Whatever cannot be represented
//! faithfully is left out and accounted for: unsupported indexes become
//! [`SkippedIndexRecord`]s on the table, dropped defaults and constraints
//! become warnings.

use crate::report::{ImportWarning, ImportWarningKind};
use crate::schema::{IndexKey, IndexKind, SkippedIndexRecord, SourceDefault, SourceIndex, SourceTable};
use crate::type_mapping::{TargetKind, map_declared_type};

/// Quote an identifier for the target, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An index that will be created after the data copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedIndex {
    pub name: String,
    pub column: String,
    pub unique: bool,
    pub ddl: String,
}

/// Output of synthesizing one table
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedTable {
    pub create_table: String,
    pub indexes: Vec<PlannedIndex>,
    /// Columns that received an inline UNIQUE constraint
    pub unique_columns: Vec<String>,
    /// Target kind of each column, in column order
    pub column_kinds: Vec<TargetKind>,
    pub warnings: Vec<ImportWarning>,
}

/// Synthesize target DDL for `table`.
///
/// Indexes that cannot be recreated are appended to `table.skipped_indexes`.
pub fn synthesize_table(table: &mut SourceTable) -> SynthesizedTable {
    let label = table.qualified_name();
    let mut warnings = Vec::new();
    let mut column_kinds = Vec::with_capacity(table.columns.len());
    let mut unique_columns = Vec::new();
    let mut lines = Vec::with_capacity(table.columns.len() + 1);

    let inline_pk = match table.primary_key.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    };

    for column in &table.columns {
        let mapping = map_declared_type(&column.declared_type);
        column_kinds.push(mapping.kind);
        if !mapping.known {
            let message = if column.declared_type.is_empty() {
                "column declares no type; stored as TEXT".to_string()
            } else {
                format!(
                    "unrecognised type '{}'; stored as TEXT",
                    column.declared_type
                )
            };
            warnings.push(
                ImportWarning::for_table(ImportWarningKind::TypeMapping, &label, message)
                    .with_column(&column.name),
            );
        }

        let mut line = format!(
            "    {} {}",
            quote_identifier(&column.name),
            mapping.kind.sql_type()
        );
        if column.not_null {
            line.push_str(" NOT NULL");
        }
        match &column.default {
            Some(SourceDefault::Literal(literal)) => {
                line.push_str(" DEFAULT ");
                line.push_str(literal);
            }
            Some(SourceDefault::Expression(expr)) => {
                warnings.push(
                    ImportWarning::for_table(
                        ImportWarningKind::UnsupportedConstruct,
                        &label,
                        format!("default expression '{}' dropped", expr),
                    )
                    .with_column(&column.name),
                );
            }
            None => {}
        }
        let is_inline_pk = inline_pk
            .as_deref()
            .is_some_and(|pk| pk.eq_ignore_ascii_case(&column.name));
        if is_inline_pk {
            line.push_str(" PRIMARY KEY");
        } else if column.unique {
            line.push_str(" UNIQUE");
            unique_columns.push(column.name.clone());
        }
        lines.push(line);
    }

    if table.primary_key.len() > 1 {
        let keys: Vec<String> = table
            .primary_key
            .iter()
            .map(|k| quote_identifier(k))
            .collect();
        lines.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
    }

    let create_table = format!(
        "CREATE TABLE {} (\n{}\n)",
        quote_identifier(&table.target_name),
        lines.join(",\n")
    );

    if !table.dropped_constructs.is_empty() {
        warnings.push(ImportWarning::for_table(
            ImportWarningKind::UnsupportedConstruct,
            &label,
            format!("not recreated: {}", table.dropped_constructs.join(", ")),
        ));
    }
    if !table.foreign_keys.is_empty() {
        warnings.push(ImportWarning::for_table(
            ImportWarningKind::UnsupportedConstruct,
            &label,
            format!(
                "{} foreign key reference(s) recorded but not created",
                table.foreign_keys.len()
            ),
        ));
    }

    let mut indexes = Vec::new();
    let source_indexes = std::mem::take(&mut table.indexes);
    for index in &source_indexes {
        match index_skip_reason(table, index) {
            Some(reason) => table.skipped_indexes.push(SkippedIndexRecord {
                index: index.name.clone(),
                table: label.clone(),
                reason,
            }),
            None => indexes.push(plan_index(table, index)),
        }
    }
    table.indexes = source_indexes;

    SynthesizedTable {
        create_table,
        indexes,
        unique_columns,
        column_kinds,
        warnings,
    }
}

/// Why `index` cannot be recreated, or `None` when it can
pub fn index_skip_reason(table: &SourceTable, index: &SourceIndex) -> Option<String> {
    match index.kind {
        IndexKind::Fulltext => return Some("fulltext index not supported".into()),
        IndexKind::Spatial => return Some("spatial index not supported".into()),
        IndexKind::Regular => {}
    }
    if index
        .keys
        .iter()
        .any(|k| matches!(k, IndexKey::Expression(_)))
    {
        return Some("expression index not supported".into());
    }
    if index.predicate.is_some() {
        return Some("partial index predicate not supported".into());
    }
    if let Some(method) = &index.method
        && method != "btree"
    {
        return Some(format!("{} index method not supported", method));
    }
    let [key] = index.keys.as_slice() else {
        return Some("multi-column index not supported".into());
    };
    let IndexKey::Column {
        name,
        prefix_length,
    } = key
    else {
        return Some("expression index not supported".into());
    };
    if table.column_index(name).is_none() {
        return Some(format!("unknown column '{}'", name));
    }
    if prefix_length.is_some() {
        return Some("prefix-length index not supported".into());
    }
    None
}

fn plan_index(table: &SourceTable, index: &SourceIndex) -> PlannedIndex {
    let column = index
        .column_names()
        .first()
        .and_then(|name| table.column_index(name))
        .map(|idx| table.columns[idx].name.clone())
        .unwrap_or_default();

    let name = if index.name.starts_with(&table.target_name) {
        index.name.clone()
    } else {
        format!("{}_{}", table.target_name, index.name)
    };

    let ddl = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_identifier(&name),
        quote_identifier(&table.target_name),
        quote_identifier(&column)
    );

    PlannedIndex {
        name,
        column,
        unique: index.unique,
        ddl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SourceColumn, SourceForeignKey};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn users() -> SourceTable {
        let mut table = SourceTable::new("users").with_columns(vec![
            SourceColumn::new("id", "int").not_null(),
            SourceColumn::new("email", "varchar(255)").not_null(),
            SourceColumn::new("active", "tinyint(1)")
                .with_default(SourceDefault::Literal("1".into())),
            SourceColumn::new("balance", "decimal(12,2)"),
            SourceColumn::new("created", "datetime")
                .with_default(SourceDefault::Expression("now()".into())),
        ]);
        table.set_primary_key(&["id".into()]).unwrap();
        table.mark_unique("email");
        table
    }

    #[test]
    fn test_create_table_statement() {
        let mut table = users();
        let out = synthesize_table(&mut table);
        assert_eq!(
            out.create_table,
            indoc! {r#"
                CREATE TABLE "users" (
                    "id" BIGINT NOT NULL PRIMARY KEY,
                    "email" TEXT NOT NULL UNIQUE,
                    "active" BOOLEAN DEFAULT 1,
                    "balance" TEXT,
                    "created" TEXT
                )"#}
        );
        assert_eq!(out.unique_columns, vec!["email"]);
        assert_eq!(
            out.column_kinds,
            vec![
                TargetKind::Integer,
                TargetKind::Text,
                TargetKind::Boolean,
                TargetKind::Decimal,
                TargetKind::Text
            ]
        );
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, ImportWarningKind::UnsupportedConstruct);
        assert_eq!(out.warnings[0].column.as_deref(), Some("created"));
    }

    #[test]
    fn test_composite_primary_key_is_table_constraint() {
        let mut table = SourceTable::new("line_items").with_columns(vec![
            SourceColumn::new("order_id", "int"),
            SourceColumn::new("line", "int"),
        ]);
        table
            .set_primary_key(&["order_id".into(), "line".into()])
            .unwrap();
        let out = synthesize_table(&mut table);
        assert!(out.create_table.contains(r#"PRIMARY KEY ("order_id", "line")"#));
        assert!(!out.create_table.contains("BIGINT PRIMARY KEY"));
    }

    #[test]
    fn test_expression_and_plain_index() {
        let mut table = users();
        table
            .indexes
            .push(SourceIndex::on_columns("idx_email", "users", &["email"]));
        table.indexes.push(SourceIndex::new(
            "idx_lower",
            "users",
            vec![IndexKey::Expression("lower(email)".into())],
        ));

        let out = synthesize_table(&mut table);
        assert_eq!(out.indexes.len(), 1);
        assert_eq!(
            out.indexes[0].ddl,
            r#"CREATE INDEX "users_idx_email" ON "users" ("email")"#
        );
        assert_eq!(table.skipped_indexes.len(), 1);
        assert_eq!(table.skipped_indexes[0].index, "idx_lower");
        assert_eq!(
            table.skipped_indexes[0].reason,
            "expression index not supported"
        );
        assert_eq!(table.indexes.len(), 2);
    }

    #[test]
    fn test_skip_reasons() {
        let table = users();
        let reason = |index: SourceIndex| index_skip_reason(&table, &index);

        let mut partial = SourceIndex::on_columns("p", "users", &["email"]);
        partial.predicate = Some("active = 1".into());
        assert_eq!(reason(partial).unwrap(), "partial index predicate not supported");

        let multi = SourceIndex::on_columns("m", "users", &["email", "active"]);
        assert_eq!(reason(multi).unwrap(), "multi-column index not supported");

        let unknown = SourceIndex::on_columns("u", "users", &["ghost"]);
        assert_eq!(reason(unknown).unwrap(), "unknown column 'ghost'");

        let mut gin = SourceIndex::on_columns("g", "users", &["email"]);
        gin.method = Some("gin".into());
        assert_eq!(reason(gin).unwrap(), "gin index method not supported");

        let prefix = SourceIndex::new(
            "pre",
            "users",
            vec![IndexKey::Column {
                name: "email".into(),
                prefix_length: Some(8),
            }],
        );
        assert_eq!(reason(prefix).unwrap(), "prefix-length index not supported");

        let mut fulltext = SourceIndex::on_columns("f", "users", &["email"]);
        fulltext.kind = IndexKind::Fulltext;
        assert_eq!(reason(fulltext).unwrap(), "fulltext index not supported");

        let mut btree = SourceIndex::on_columns("b", "users", &["email"]).unique();
        btree.method = Some("btree".into());
        assert_eq!(reason(btree), None);
    }

    #[test]
    fn test_unknown_type_and_dropped_constructs_warn() {
        let mut table = SourceTable::new("geo").with_columns(vec![
            SourceColumn::new("id", "int"),
            SourceColumn::new("attrs", "hstore"),
        ]);
        table.dropped_constructs.push("CHECK constraint 'positive'".into());
        table.foreign_keys.push(SourceForeignKey {
            column: "id".into(),
            referenced_table: "parent".into(),
            referenced_column: "id".into(),
        });

        let out = synthesize_table(&mut table);
        let kinds: Vec<ImportWarningKind> = out.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImportWarningKind::TypeMapping,
                ImportWarningKind::UnsupportedConstruct,
                ImportWarningKind::UnsupportedConstruct
            ]
        );
        assert!(out.warnings[1].message.contains("positive"));
        assert!(!out.create_table.contains("CHECK"));
        assert!(!out.create_table.contains("REFERENCES"));
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(quote_identifier("plain"), r#""plain""#);
        assert_eq!(quote_identifier(r#"we"ird"#), r#""we""ird""#);
    }
}
