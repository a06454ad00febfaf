//! Normalized source schema model
//!
//! Every source kind introspects into these types. Column order in a
//! [`SourceTable`] is the positional order the table's data rows use.

use serde::Serialize;

/// Default value of a column as recovered from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDefault {
    /// A literal that can be written verbatim into target DDL
    /// (`0`, `'abc'`, `NULL`, `TRUE`, `CURRENT_TIMESTAMP`)
    Literal(String),
    /// Anything else: function calls, sequences, casts. Never emitted.
    Expression(String),
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// Declared type exactly as the source spells it, may be empty
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// Single-column UNIQUE constraint
    pub unique: bool,
    pub default: Option<SourceDefault>,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, default: SourceDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Foreign key reference, informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// One key part of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Column {
        name: String,
        /// MySQL `col(10)` prefix length
        prefix_length: Option<u32>,
    },
    Expression(String),
}

/// Index flavour beyond plain B-tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    #[default]
    Regular,
    Fulltext,
    Spatial,
}

/// Index information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIndex {
    pub name: String,
    /// Schema qualifier written on the indexed table, if any
    pub schema: Option<String>,
    pub table: String,
    pub keys: Vec<IndexKey>,
    pub unique: bool,
    pub kind: IndexKind,
    /// Access method named with `USING`, lower case
    pub method: Option<String>,
    /// `WHERE` predicate of a partial index
    pub predicate: Option<String>,
}

impl SourceIndex {
    pub fn new(name: impl Into<String>, table: impl Into<String>, keys: Vec<IndexKey>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            table: table.into(),
            keys,
            unique: false,
            kind: IndexKind::Regular,
            method: None,
            predicate: None,
        }
    }

    /// Shorthand for a plain index over named columns
    pub fn on_columns(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        let keys = columns
            .iter()
            .map(|c| IndexKey::Column {
                name: (*c).to_string(),
                prefix_length: None,
            })
            .collect();
        Self::new(name, table, keys)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Names of the plain column key parts
    pub fn column_names(&self) -> Vec<&str> {
        self.keys
            .iter()
            .filter_map(|k| match k {
                IndexKey::Column { name, .. } => Some(name.as_str()),
                IndexKey::Expression(_) => None,
            })
            .collect()
    }
}

/// An index the synthesizer declined to recreate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedIndexRecord {
    pub index: String,
    pub table: String,
    pub reason: String,
}

/// Table information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    /// Table name in the source, unqualified
    pub name: String,
    pub schema: Option<String>,
    /// Name the table gets in the target
    pub target_name: String,
    pub columns: Vec<SourceColumn>,
    /// Primary key columns in key order
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<SourceForeignKey>,
    pub indexes: Vec<SourceIndex>,
    pub skipped_indexes: Vec<SkippedIndexRecord>,
    /// Constructs seen in the source that are never reconstructed
    /// (CHECK constraints, generated expressions, `ON UPDATE` clauses)
    pub dropped_constructs: Vec<String>,
    /// Row count when the source can tell cheaply
    pub row_estimate: Option<u64>,
}

impl SourceTable {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target_name: name.clone(),
            name,
            schema: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            skipped_indexes: Vec::new(),
            dropped_constructs: Vec::new(),
            row_estimate: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<SourceColumn>) -> Self {
        self.columns = columns;
        self
    }

    /// `schema.table` when the schema is known
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Mark `columns` as the primary key, in that order.
    ///
    /// Fails with the first column name that does not exist.
    pub fn set_primary_key(&mut self, columns: &[String]) -> Result<(), String> {
        let mut resolved = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = self.column_index(name).ok_or_else(|| name.clone())?;
            resolved.push(idx);
        }
        for column in &mut self.columns {
            column.primary_key = false;
        }
        self.primary_key.clear();
        for idx in resolved {
            self.columns[idx].primary_key = true;
            self.primary_key.push(self.columns[idx].name.clone());
        }
        Ok(())
    }

    pub fn mark_unique(&mut self, column: &str) -> bool {
        match self.column_index(column) {
            Some(idx) => {
                self.columns[idx].unique = true;
                true
            }
            None => false,
        }
    }

    /// Rebuild the column list in `order`. Columns missing from `order` are
    /// removed and returned; an entry of `order` with no matching column is
    /// returned as the error.
    pub fn reorder_columns(&mut self, order: &[String]) -> Result<Vec<String>, String> {
        let mut remaining = std::mem::take(&mut self.columns);
        let mut reordered = Vec::with_capacity(order.len());
        for name in order {
            match remaining
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(name))
            {
                Some(pos) => reordered.push(remaining.remove(pos)),
                None => {
                    reordered.append(&mut remaining);
                    self.columns = reordered;
                    return Err(name.clone());
                }
            }
        }
        let dropped: Vec<String> = remaining.into_iter().map(|c| c.name).collect();
        self.columns = reordered;
        self.primary_key.retain(|k| !dropped.iter().any(|d| d.eq_ignore_ascii_case(k)));
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SourceTable {
        SourceTable::new("orders").with_columns(vec![
            SourceColumn::new("id", "int"),
            SourceColumn::new("customer", "varchar(20)"),
            SourceColumn::new("total", "decimal(10,2)"),
        ])
    }

    #[test]
    fn test_composite_primary_key_keeps_key_order() {
        let mut t = table();
        t.set_primary_key(&["customer".into(), "ID".into()]).unwrap();
        assert_eq!(t.primary_key, vec!["customer", "id"]);
        assert!(t.columns[0].primary_key);
        assert!(t.columns[1].primary_key);
        assert!(!t.columns[2].primary_key);
    }

    #[test]
    fn test_primary_key_unknown_column() {
        let mut t = table();
        assert_eq!(t.set_primary_key(&["nope".into()]), Err("nope".to_string()));
        assert!(t.primary_key.is_empty());
    }

    #[test]
    fn test_reorder_drops_columns_absent_from_data() {
        let mut t = table();
        let dropped = t
            .reorder_columns(&["total".into(), "id".into()])
            .unwrap();
        assert_eq!(dropped, vec!["customer"]);
        assert_eq!(t.column_names(), vec!["total", "id"]);
    }

    #[test]
    fn test_reorder_rejects_unknown_data_column() {
        let mut t = table();
        let err = t.reorder_columns(&["id".into(), "ghost".into()]).unwrap_err();
        assert_eq!(err, "ghost");
        assert_eq!(t.columns.len(), 3);
    }
}
