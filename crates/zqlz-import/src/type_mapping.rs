//! Declared source type → target primitive kind lookup

use serde::Serialize;

/// Primitive kinds the target schema is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetKind {
    Boolean,
    Integer,
    Float,
    Text,
    /// Exact numeric kept as text so no precision is lost
    Decimal,
    Binary,
}

impl TargetKind {
    /// Column type used in synthesized DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            TargetKind::Boolean => "BOOLEAN",
            TargetKind::Integer => "BIGINT",
            TargetKind::Float => "DOUBLE",
            TargetKind::Text | TargetKind::Decimal => "TEXT",
            TargetKind::Binary => "BLOB",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TargetKind::Boolean => "boolean",
            TargetKind::Integer => "integer",
            TargetKind::Float => "float",
            TargetKind::Text => "text",
            TargetKind::Decimal => "decimal",
            TargetKind::Binary => "binary",
        }
    }
}

/// Outcome of looking up a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapping {
    pub kind: TargetKind,
    /// `false` when the declared type was not in the table and defaulted to text
    pub known: bool,
}

/// Map a declared source type (`varchar(255)`, `int unsigned`, `double precision`,
/// `timestamp without time zone`, ...) to a target kind.
pub fn map_declared_type(declared: &str) -> TypeMapping {
    let normalized = declared.trim().to_lowercase();

    // MySQL's conventional boolean spelling
    if normalized.starts_with("tinyint(1)") {
        return known(TargetKind::Boolean);
    }
    if normalized.ends_with("[]") {
        return known(TargetKind::Text);
    }

    let base = base_type_name(&normalized);
    let kind = match base.as_str() {
        "bool" | "boolean" => TargetKind::Boolean,

        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "smallserial" | "serial" | "bigserial" | "serial2" | "serial4" | "serial8"
        | "year" => TargetKind::Integer,

        "float" | "double" | "double precision" | "real" | "float4" | "float8" => {
            TargetKind::Float
        }

        "decimal" | "numeric" | "dec" | "fixed" | "money" => TargetKind::Decimal,

        "char" | "varchar" | "character" | "character varying" | "nchar" | "nvarchar"
        | "national char" | "national character" | "varchar2" | "bpchar" | "text"
        | "tinytext" | "mediumtext" | "longtext" | "clob" | "citext" | "string" | "enum"
        | "set" | "json" | "jsonb" | "xml" | "uuid" | "date" | "time" | "timetz"
        | "datetime" | "timestamp" | "timestamptz" | "interval" | "inet" | "cidr"
        | "macaddr" => TargetKind::Text,

        "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" | "bytea"
        | "bit" | "geometry" | "point" | "linestring" | "polygon" => TargetKind::Binary,

        _ => {
            return TypeMapping {
                kind: TargetKind::Text,
                known: false,
            };
        }
    };
    known(kind)
}

fn known(kind: TargetKind) -> TypeMapping {
    TypeMapping { kind, known: true }
}

/// Strip length/precision arguments and modifiers, keeping multi-word names
/// such as `double precision` or `character varying` intact.
fn base_type_name(normalized: &str) -> String {
    let without_args = match normalized.find('(') {
        Some(pos) => &normalized[..pos],
        None => normalized,
    };

    let words: Vec<&str> = without_args
        .split_whitespace()
        .filter(|w| !matches!(*w, "unsigned" | "signed" | "zerofill"))
        .collect();

    match words.as_slice() {
        [] => String::new(),
        ["double", "precision", ..] => "double precision".into(),
        ["character", "varying", ..] => "character varying".into(),
        ["national", "char", ..] => "national char".into(),
        ["national", "character", ..] => "national character".into(),
        ["timestamp", rest @ ..] if rest.first() == Some(&"with") => "timestamptz".into(),
        ["time", rest @ ..] if rest.first() == Some(&"with") => "timetz".into(),
        [first, ..] => (*first).to_string(),
    }
}
