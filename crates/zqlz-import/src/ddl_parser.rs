//! DDL statement parser
//!
//! Understands the subset of `CREATE TABLE`, `CREATE INDEX` and
//! `ALTER TABLE ... ADD` written by MySQL, PostgreSQL and SQLite dump tools,
//! well enough to recover columns, declared types, keys and index shapes.
//! It is not a validator: unknown column attributes and table options are
//! skipped, and anything whose structure cannot be recovered is an error so
//! the caller can skip the table with a warning.

use crate::error::DdlParseError;
use crate::schema::{
    IndexKey, IndexKind, SourceColumn, SourceDefault, SourceForeignKey, SourceIndex, SourceTable,
};

type ParseResult<T> = std::result::Result<T, DdlParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    QuotedIdent,
    Str,
    Number,
    Symbol,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// Unquoted, unescaped text
    text: String,
    /// Byte range in the statement, quotes included
    start: usize,
    end: usize,
}

impl Token {
    fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn tokenize(sql: &str) -> ParseResult<Vec<Token>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if (b == b'-' && bytes.get(i + 1) == Some(&b'-')) || b == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            loop {
                if i + 1 >= bytes.len() {
                    return Err(DdlParseError::Unterminated);
                }
                if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }

        match b {
            b'\'' => {
                let (text, end) = read_quoted(bytes, i, b'\'', true)?;
                tokens.push(Token {
                    kind: TokenKind::Str,
                    text,
                    start,
                    end,
                });
                i = end;
            }
            b'"' | b'`' => {
                let (text, end) = read_quoted(bytes, i, b, false)?;
                tokens.push(Token {
                    kind: TokenKind::QuotedIdent,
                    text,
                    start,
                    end,
                });
                i = end;
            }
            b'[' if bytes
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_alphabetic() || *n == b'_') =>
            {
                let close = bytes[i + 1..]
                    .iter()
                    .position(|c| *c == b']')
                    .ok_or(DdlParseError::Unterminated)?;
                let end = i + 1 + close + 1;
                tokens.push(Token {
                    kind: TokenKind::QuotedIdent,
                    text: sql[i + 1..end - 1].to_string(),
                    start,
                    end,
                });
                i = end;
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: sql[start..i].to_string(),
                    start,
                    end: i,
                });
            }
            b'.' if bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                i = scan_number(bytes, i);
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: sql[start..i].to_string(),
                    start,
                    end: i,
                });
            }
            _ if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: sql[start..i].to_string(),
                    start,
                    end: i,
                });
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    text: "::".to_string(),
                    start,
                    end: i,
                });
            }
            _ => {
                let len = sql[i..].chars().next().map_or(1, char::len_utf8);
                i += len;
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    text: sql[start..i].to_string(),
                    start,
                    end: i,
                });
            }
        }
    }

    Ok(tokens)
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        let mut j = i + 1;
        if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

/// Read a quoted run starting at `start` (the opening quote). Doubled quotes
/// are an escaped quote; backslash escapes apply to string literals only.
fn read_quoted(
    bytes: &[u8],
    start: usize,
    quote: u8,
    backslash: bool,
) -> ParseResult<(String, usize)> {
    let mut out = Vec::new();
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash && b == b'\\' && i + 1 < bytes.len() {
            out.push(match bytes[i + 1] {
                b'n' => b'\n',
                b't' => b'\t',
                b'r' => b'\r',
                b'0' => 0,
                b'Z' => 0x1a,
                other => other,
            });
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return Ok((String::from_utf8_lossy(&out).into_owned(), i + 1));
        }
        out.push(b);
        i += 1;
    }
    Err(DdlParseError::Unterminated)
}

/// Collapse whitespace runs so types and expressions read uniformly
fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Parser<'a> {
    sql: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, tokens: &'a [Token]) -> Self {
        // trailing statement terminators carry no meaning here
        let mut end = tokens.len();
        while end > 0 && tokens[end - 1].is_symbol(";") {
            end -= 1;
        }
        Self {
            sql,
            tokens: &tokens[..end],
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_word(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_word(keyword))
    }

    fn peek_symbol(&self, symbol: &str) -> bool {
        self.peek().is_some_and(|t| t.is_symbol(symbol))
    }

    fn eat_word(&mut self, keyword: &str) -> bool {
        if self.peek_word(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_words(&mut self, keywords: &[&str]) -> bool {
        let matches = keywords
            .iter()
            .enumerate()
            .all(|(n, kw)| self.peek_nth(n).is_some_and(|t| t.is_word(kw)));
        if matches {
            self.pos += keywords.len();
        }
        matches
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.peek_symbol(symbol) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> DdlParseError {
        match self.peek() {
            Some(token) => DdlParseError::Expected {
                expected: expected.to_string(),
                found: token.text.clone(),
            },
            None => DdlParseError::UnexpectedEnd,
        }
    }

    fn expect_word(&mut self, keyword: &str) -> ParseResult<()> {
        if self.eat_word(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(keyword))
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some(token) if token.is_ident() => {
                self.pos += 1;
                Ok(token.text.clone())
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// `a`, `s.a` or `db.s.a`; returns the last two parts
    fn qualified_name(&mut self) -> ParseResult<(Option<String>, String)> {
        let mut parts = vec![self.ident()?];
        while self.peek_symbol(".") && self.peek_nth(1).is_some_and(Token::is_ident) {
            self.pos += 1;
            parts.push(self.ident()?);
        }
        let name = parts.pop().ok_or(DdlParseError::UnexpectedEnd)?;
        Ok((parts.pop(), name))
    }

    /// Consume a parenthesized group and return the tokens inside it
    fn group(&mut self) -> ParseResult<&'a [Token]> {
        if !self.peek_symbol("(") {
            return Err(self.unexpected("("));
        }
        let open = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.advance() {
            if token.is_symbol("(") {
                depth += 1;
            } else if token.is_symbol(")") {
                depth -= 1;
                if depth == 0 {
                    return Ok(&self.tokens[open + 1..self.pos - 1]);
                }
            }
        }
        Err(DdlParseError::Unbalanced)
    }

    /// Skip one token, or a whole group when positioned on `(`
    fn skip_item(&mut self) -> ParseResult<()> {
        if self.peek_symbol("(") {
            self.group().map(|_| ())
        } else {
            self.advance().map(|_| ()).ok_or(DdlParseError::UnexpectedEnd)
        }
    }

    fn skip_using(&mut self) {
        if self.eat_word("USING") {
            self.advance();
        }
    }

    fn rest(&self) -> &'a [Token] {
        &self.tokens[self.pos.min(self.tokens.len())..]
    }

    fn text_of(&self, tokens: &[Token]) -> String {
        match (tokens.first(), tokens.last()) {
            (Some(first), Some(last)) => normalize_space(&self.sql[first.start..last.end]),
            _ => String::new(),
        }
    }
}

fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_symbol("(") {
            depth += 1;
        } else if token.is_symbol(")") {
            depth -= 1;
        } else if depth == 0 && token.is_symbol(",") {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    if start < tokens.len() {
        parts.push(&tokens[start..]);
    }
    parts
}

/// A table-level constraint, index or column change, from `CREATE TABLE` or `ALTER TABLE`
#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    PrimaryKey(Vec<String>),
    Unique {
        name: Option<String>,
        columns: Vec<String>,
        /// Written as an index (`UNIQUE KEY name (...)`), not a constraint
        as_index: bool,
    },
    Index(SourceIndex),
    ForeignKey {
        columns: Vec<String>,
        referenced_table: String,
        referenced_columns: Vec<String>,
    },
    Check(Option<String>),
    /// `ALTER COLUMN c SET DEFAULT ...`, or `DROP DEFAULT` as `None`
    ColumnDefault {
        column: String,
        default: Option<SourceDefault>,
    },
    Other(String),
}

/// Statements this module recognises
#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    CreateTable(SourceTable),
    CreateIndex(SourceIndex),
    AlterTable {
        schema: Option<String>,
        table: String,
        constraints: Vec<TableConstraint>,
    },
}

/// Parse a statement if it is one of `CREATE TABLE`, `CREATE INDEX` or
/// `ALTER TABLE`. Returns `Ok(None)` for any other statement.
pub fn parse_statement(sql: &str) -> ParseResult<Option<DdlStatement>> {
    let tokens = tokenize(sql)?;
    let mut p = Parser::new(sql, &tokens);

    if p.eat_word("ALTER") {
        if !p.peek_word("TABLE") {
            return Ok(None);
        }
        p.pos = 0;
        let (schema, table, constraints) = alter_table(&mut p)?;
        return Ok(Some(DdlStatement::AlterTable {
            schema,
            table,
            constraints,
        }));
    }
    if !p.eat_word("CREATE") {
        return Ok(None);
    }

    let mut ahead = 0;
    while let Some(token) = p.peek_nth(ahead) {
        if token.is_word("TABLE") {
            p.pos = 0;
            return create_table(&mut p).map(|t| Some(DdlStatement::CreateTable(t)));
        }
        if token.is_word("INDEX") {
            p.pos = 0;
            return create_index(&mut p).map(|i| Some(DdlStatement::CreateIndex(i)));
        }
        if token.kind != TokenKind::Word || ahead > 4 {
            break;
        }
        ahead += 1;
    }
    Ok(None)
}

/// Parse a `CREATE TABLE` statement
pub fn parse_create_table(sql: &str) -> ParseResult<SourceTable> {
    let tokens = tokenize(sql)?;
    let mut p = Parser::new(sql, &tokens);
    create_table(&mut p)
}

/// Parse a `CREATE INDEX` statement
pub fn parse_create_index(sql: &str) -> ParseResult<SourceIndex> {
    let tokens = tokenize(sql)?;
    let mut p = Parser::new(sql, &tokens);
    create_index(&mut p)
}

/// Classify a default value written as SQL text, e.g. the `dflt_value`
/// column of SQLite's `PRAGMA table_info`.
pub fn classify_default(text: &str) -> SourceDefault {
    match tokenize(text) {
        Ok(tokens) if !tokens.is_empty() => {
            let p = Parser::new(text, &tokens);
            classify_default_tokens(&p, p.tokens)
        }
        _ => SourceDefault::Expression(normalize_space(text)),
    }
}

/// Apply a parsed constraint to `table`.
///
/// Errors name the column that does not exist in the table.
pub fn apply_constraint(table: &mut SourceTable, constraint: TableConstraint) -> Result<(), String> {
    match constraint {
        TableConstraint::PrimaryKey(columns) => table.set_primary_key(&columns),
        TableConstraint::Unique {
            name,
            columns,
            as_index,
        } => {
            if !as_index && columns.len() == 1 {
                if table.mark_unique(&columns[0]) {
                    Ok(())
                } else {
                    Err(columns[0].clone())
                }
            } else {
                let name = name.unwrap_or_else(|| format!("{}_{}_key", table.name, columns.join("_")));
                let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
                table
                    .indexes
                    .push(SourceIndex::on_columns(name, table.name.clone(), &refs).unique());
                Ok(())
            }
        }
        TableConstraint::Index(mut index) => {
            index.table = table.name.clone();
            table.indexes.push(index);
            Ok(())
        }
        TableConstraint::ForeignKey {
            columns,
            referenced_table,
            referenced_columns,
        } => {
            for (pos, column) in columns.iter().enumerate() {
                table.foreign_keys.push(SourceForeignKey {
                    column: column.clone(),
                    referenced_table: referenced_table.clone(),
                    referenced_column: referenced_columns.get(pos).cloned().unwrap_or_default(),
                });
            }
            Ok(())
        }
        TableConstraint::Check(name) => {
            table.dropped_constructs.push(match name {
                Some(name) => format!("CHECK constraint '{}'", name),
                None => "CHECK constraint".to_string(),
            });
            Ok(())
        }
        TableConstraint::ColumnDefault { column, default } => {
            match table.column_index(&column) {
                Some(idx) => {
                    table.columns[idx].default = default;
                    Ok(())
                }
                None => Err(column),
            }
        }
        TableConstraint::Other(description) => {
            table.dropped_constructs.push(description);
            Ok(())
        }
    }
}

fn create_table(p: &mut Parser<'_>) -> ParseResult<SourceTable> {
    p.expect_word("CREATE")?;
    p.eat_words(&["OR", "REPLACE"]);
    loop {
        if p.eat_word("TEMPORARY")
            || p.eat_word("TEMP")
            || p.eat_word("UNLOGGED")
            || p.eat_word("GLOBAL")
            || p.eat_word("LOCAL")
        {
            continue;
        }
        break;
    }
    if p.peek_word("VIRTUAL") {
        return Err(DdlParseError::NotStatement("plain CREATE TABLE"));
    }
    p.expect_word("TABLE")?;
    p.eat_words(&["IF", "NOT", "EXISTS"]);
    let (schema, name) = p.qualified_name()?;

    if !p.peek_symbol("(") {
        return Err(p.unexpected("column list"));
    }
    let body = p.group()?;

    let mut table = SourceTable::new(name.clone());
    table.schema = schema;

    let mut constraints = Vec::new();
    for element in split_commas(body) {
        if element.is_empty() {
            continue;
        }
        let mut ep = Parser {
            sql: p.sql,
            tokens: element,
            pos: 0,
        };
        match table_constraint(&mut ep)? {
            Some(constraint) => constraints.push(constraint),
            None => {
                let (column, extra) = column_definition(&mut ep)?;
                constraints.extend(extra);
                table.columns.push(column);
            }
        }
    }

    if table.columns.is_empty() {
        return Err(DdlParseError::NoColumns(name));
    }

    // inline PRIMARY KEY flags become the table key unless a table-level one exists
    let inline_pk: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if !inline_pk.is_empty() {
        table.primary_key = inline_pk;
    }

    for constraint in constraints {
        apply_constraint(&mut table, constraint).map_err(|column| DdlParseError::Expected {
            expected: "a column of this table".to_string(),
            found: column,
        })?;
    }

    Ok(table)
}

fn key_columns(p: &Parser<'_>, tokens: &[Token]) -> ParseResult<Vec<String>> {
    let keys = index_keys(p, tokens)?;
    keys.into_iter()
        .map(|key| match key {
            IndexKey::Column { name, .. } => Ok(name),
            IndexKey::Expression(expr) => Err(DdlParseError::Expected {
                expected: "column name".to_string(),
                found: expr,
            }),
        })
        .collect()
}

fn index_keys(p: &Parser<'_>, tokens: &[Token]) -> ParseResult<Vec<IndexKey>> {
    let mut keys = Vec::new();
    for part in split_commas(tokens) {
        if part.is_empty() {
            return Err(DdlParseError::Expected {
                expected: "index key".to_string(),
                found: ",".to_string(),
            });
        }
        keys.push(index_key(p, part));
    }
    Ok(keys)
}

fn index_key(p: &Parser<'_>, part: &[Token]) -> IndexKey {
    let expression = || IndexKey::Expression(p.text_of(part));
    let Some(first) = part.first().filter(|t| t.is_ident()) else {
        return expression();
    };

    let mut rest = &part[1..];
    let mut prefix_length = None;
    if rest.first().is_some_and(|t| t.is_symbol("(")) {
        match rest {
            [_, n, close, tail @ ..] if n.kind == TokenKind::Number && close.is_symbol(")") => {
                match n.text.parse::<u32>() {
                    Ok(len) => prefix_length = Some(len),
                    Err(_) => return expression(),
                }
                rest = tail;
            }
            _ => return expression(),
        }
    }

    // ASC / DESC / COLLATE x / NULLS FIRST / operator class
    if rest.iter().all(Token::is_ident) {
        IndexKey::Column {
            name: first.text.clone(),
            prefix_length,
        }
    } else {
        expression()
    }
}

/// Parse a table-level element if it is a constraint or index; leaves the
/// parser untouched and returns `None` for a column definition.
fn table_constraint(p: &mut Parser<'_>) -> ParseResult<Option<TableConstraint>> {
    let start = p.pos;
    let mut name = None;
    if p.eat_word("CONSTRAINT") {
        let keyword_follows = ["PRIMARY", "UNIQUE", "CHECK", "FOREIGN", "EXCLUDE"]
            .iter()
            .any(|kw| p.peek_word(kw));
        if !keyword_follows {
            name = Some(p.ident()?);
        }
    }

    let constraint = if p.eat_words(&["PRIMARY", "KEY"]) {
        p.skip_using();
        let group = p.group()?;
        TableConstraint::PrimaryKey(key_columns(p, group)?)
    } else if p.eat_word("UNIQUE") {
        let keyword = p.eat_word("KEY") || p.eat_word("INDEX");
        let mut index_name = None;
        if !p.peek_symbol("(") && !p.peek_word("USING") {
            index_name = Some(p.ident()?);
        }
        p.skip_using();
        let group = p.group()?;
        let columns = key_columns(p, group)?;
        // `UNIQUE KEY name (...)` and `UNIQUE name (...)` are MySQL index syntax
        let as_index = keyword || index_name.is_some();
        TableConstraint::Unique {
            name: index_name.or(name),
            columns,
            as_index,
        }
    } else if p.peek_word("KEY") || p.peek_word("INDEX") {
        p.advance();
        index_definition(p, IndexKind::Regular)?
    } else if p.peek_word("FULLTEXT") || p.peek_word("SPATIAL") {
        let kind = if p.eat_word("FULLTEXT") {
            IndexKind::Fulltext
        } else {
            p.advance();
            IndexKind::Spatial
        };
        let _ = p.eat_word("KEY") || p.eat_word("INDEX");
        index_definition(p, kind)?
    } else if p.eat_words(&["FOREIGN", "KEY"]) {
        if !p.peek_symbol("(") {
            p.ident()?;
        }
        let group = p.group()?;
        let columns = key_columns(p, group)?;
        p.expect_word("REFERENCES")?;
        let (_, referenced_table) = p.qualified_name()?;
        let referenced_columns = if p.peek_symbol("(") {
            let group = p.group()?;
            key_columns(p, group)?
        } else {
            Vec::new()
        };
        TableConstraint::ForeignKey {
            columns,
            referenced_table,
            referenced_columns,
        }
    } else if p.eat_word("CHECK") {
        TableConstraint::Check(name)
    } else if p.eat_word("EXCLUDE") {
        TableConstraint::Other("EXCLUDE constraint".to_string())
    } else if let Some(name) = name {
        TableConstraint::Other(format!("constraint '{}'", name))
    } else {
        p.pos = start;
        return Ok(None);
    };

    Ok(Some(constraint))
}

/// `[name] [USING m] (keys) [USING m]` after KEY / INDEX / FULLTEXT / SPATIAL
fn index_definition(p: &mut Parser<'_>, kind: IndexKind) -> ParseResult<TableConstraint> {
    let mut name = None;
    if !p.peek_symbol("(") && !p.peek_word("USING") {
        name = Some(p.ident()?);
    }
    let mut method = using_method(p);
    let group = p.group()?;
    let keys = index_keys(p, group)?;
    if method.is_none() {
        method = using_method(p);
    }

    let name = name.unwrap_or_else(|| {
        let columns: Vec<String> = keys
            .iter()
            .filter_map(|k| match k {
                IndexKey::Column { name, .. } => Some(name.clone()),
                IndexKey::Expression(_) => None,
            })
            .collect();
        format!("{}_idx", columns.join("_"))
    });
    let mut index = SourceIndex::new(name, String::new(), keys);
    index.kind = kind;
    index.method = method;
    Ok(TableConstraint::Index(index))
}

fn using_method(p: &mut Parser<'_>) -> Option<String> {
    if p.peek_word("USING") && p.peek_nth(1).is_some_and(|t| t.kind == TokenKind::Word) {
        p.advance();
        p.advance().map(|t| t.text.to_ascii_lowercase())
    } else {
        None
    }
}

/// Words that end a column's type and start its attribute list
fn is_column_attribute(p: &Parser<'_>) -> bool {
    let Some(token) = p.peek() else {
        return true;
    };
    if token.kind != TokenKind::Word {
        return false;
    }
    const ATTRIBUTES: &[&str] = &[
        "NOT",
        "NULL",
        "DEFAULT",
        "PRIMARY",
        "UNIQUE",
        "KEY",
        "REFERENCES",
        "CHECK",
        "CONSTRAINT",
        "AUTO_INCREMENT",
        "AUTOINCREMENT",
        "COLLATE",
        "CHARSET",
        "COMMENT",
        "GENERATED",
        "AS",
        "ON",
        "VISIBLE",
        "INVISIBLE",
        "STORED",
        "VIRTUAL",
        "STORAGE",
        "COLUMN_FORMAT",
        "SRID",
        "IDENTITY",
        "ENGINE_ATTRIBUTE",
        "SECONDARY_ENGINE_ATTRIBUTE",
    ];
    if token.is_word("CHARACTER") {
        return p.peek_nth(1).is_some_and(|t| t.is_word("SET"));
    }
    ATTRIBUTES.iter().any(|kw| token.is_word(kw))
}

fn column_definition(p: &mut Parser<'_>) -> ParseResult<(SourceColumn, Vec<TableConstraint>)> {
    let name = p.ident()?;

    let type_start = p.pos;
    while !p.at_end() && !is_column_attribute(p) {
        p.skip_item()?;
    }
    let declared_type = p.text_of(&p.tokens[type_start..p.pos]);

    let mut column = SourceColumn::new(name.clone(), declared_type);
    let mut constraints = Vec::new();

    while !p.at_end() {
        if p.eat_words(&["NOT", "NULL"]) {
            column.not_null = true;
        } else if p.eat_word("NULL") {
        } else if p.eat_word("DEFAULT") {
            let start = p.pos;
            p.skip_item()?;
            while !p.at_end() && !is_column_attribute(p) {
                p.skip_item()?;
            }
            column.default = Some(classify_default_tokens(p, &p.tokens[start..p.pos]));
        } else if p.eat_words(&["PRIMARY", "KEY"]) || p.eat_word("KEY") {
            column.primary_key = true;
            column.not_null = true;
            let _ = p.eat_word("ASC") || p.eat_word("DESC");
            if p.eat_words(&["ON", "CONFLICT"]) {
                p.advance();
            }
        } else if p.eat_word("UNIQUE") {
            let _ = p.eat_word("KEY");
            column.unique = true;
        } else if p.eat_word("REFERENCES") {
            let (_, referenced_table) = p.qualified_name()?;
            let referenced_columns = if p.peek_symbol("(") {
                let group = p.group()?;
                key_columns(p, group)?
            } else {
                Vec::new()
            };
            skip_reference_actions(p);
            constraints.push(TableConstraint::ForeignKey {
                columns: vec![name.clone()],
                referenced_table,
                referenced_columns,
            });
        } else if p.eat_word("CHECK") {
            p.group()?;
            constraints.push(TableConstraint::Other(format!(
                "CHECK constraint on column '{}'",
                name
            )));
        } else if p.eat_word("CONSTRAINT") {
            p.ident()?;
        } else if p.eat_words(&["ON", "UPDATE"]) {
            p.skip_item()?;
            while !p.at_end() && !is_column_attribute(p) {
                p.skip_item()?;
            }
            constraints.push(TableConstraint::Other(format!(
                "ON UPDATE clause on column '{}'",
                name
            )));
        } else if p.eat_word("GENERATED") {
            let _ = p.eat_word("ALWAYS") || p.eat_words(&["BY", "DEFAULT"]);
            p.expect_word("AS")?;
            if p.eat_word("IDENTITY") {
                if p.peek_symbol("(") {
                    p.group()?;
                }
            } else {
                p.group()?;
                constraints.push(TableConstraint::Other(format!(
                    "generated expression on column '{}'",
                    name
                )));
            }
        } else if p.eat_word("AS") {
            p.group()?;
            constraints.push(TableConstraint::Other(format!(
                "generated expression on column '{}'",
                name
            )));
        } else if p.eat_words(&["CHARACTER", "SET"])
            || p.eat_word("CHARSET")
            || p.eat_word("COLLATE")
            || p.eat_word("COMMENT")
            || p.eat_word("STORAGE")
            || p.eat_word("COLUMN_FORMAT")
            || p.eat_word("SRID")
        {
            p.advance();
        } else if p.eat_word("ENGINE_ATTRIBUTE") || p.eat_word("SECONDARY_ENGINE_ATTRIBUTE") {
            p.eat_symbol("=");
            p.advance();
        } else if p.eat_word("IDENTITY") {
            if p.peek_symbol("(") {
                p.group()?;
            }
        } else {
            // AUTO_INCREMENT, VISIBLE, STORED and unknown attributes
            p.skip_item()?;
        }
    }

    Ok((column, constraints))
}

fn skip_reference_actions(p: &mut Parser<'_>) {
    loop {
        if p.eat_word("ON") {
            let _ = p.eat_word("DELETE") || p.eat_word("UPDATE");
            // CASCADE | RESTRICT | SET NULL | SET DEFAULT | NO ACTION
            let _ = p.eat_word("SET") || p.eat_word("NO");
            p.advance();
        } else if p.eat_word("MATCH") {
            p.advance();
        } else if p.eat_word("DEFERRABLE") || p.eat_words(&["NOT", "DEFERRABLE"]) {
            continue;
        } else if p.eat_word("INITIALLY") {
            p.advance();
        } else {
            break;
        }
    }
}

fn classify_default_tokens(p: &Parser<'_>, tokens: &[Token]) -> SourceDefault {
    let mut tokens = tokens;

    // ('x') and (0) as written by SQLite and MySQL 8
    while tokens.len() >= 3
        && tokens[0].is_symbol("(")
        && tokens[tokens.len() - 1].is_symbol(")")
        && split_commas(&tokens[1..tokens.len() - 1]).len() == 1
        && balanced(&tokens[1..tokens.len() - 1])
    {
        tokens = &tokens[1..tokens.len() - 1];
    }

    // 'x'::character varying casts a literal to its own column type
    if let Some(cast) = tokens.iter().position(|t| t.is_symbol("::")) {
        let head = &tokens[..cast];
        if literal_text(head).is_some() {
            tokens = head;
        }
    }

    match literal_text(tokens) {
        Some(text) => SourceDefault::Literal(text),
        None => SourceDefault::Expression(p.text_of(tokens)),
    }
}

fn balanced(tokens: &[Token]) -> bool {
    let mut depth = 0i32;
    for token in tokens {
        if token.is_symbol("(") {
            depth += 1;
        } else if token.is_symbol(")") {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}

fn literal_text(tokens: &[Token]) -> Option<String> {
    const NOW_KEYWORDS: &[&str] = &[
        "CURRENT_TIMESTAMP",
        "CURRENT_DATE",
        "CURRENT_TIME",
        "LOCALTIMESTAMP",
        "LOCALTIME",
    ];

    match tokens {
        [t] if t.kind == TokenKind::Number => Some(t.text.clone()),
        [sign, t]
            if (sign.is_symbol("-") || sign.is_symbol("+")) && t.kind == TokenKind::Number =>
        {
            Some(format!("{}{}", sign.text, t.text))
        }
        [t] if t.kind == TokenKind::Str => Some(format!("'{}'", t.text.replace('\'', "''"))),
        [t] if t.is_word("NULL") || t.is_word("TRUE") || t.is_word("FALSE") => {
            Some(t.text.to_ascii_uppercase())
        }
        [t, rest @ ..] if NOW_KEYWORDS.iter().any(|kw| t.is_word(kw)) => {
            let precision_only = match rest {
                [] => true,
                [open, close] => open.is_symbol("(") && close.is_symbol(")"),
                [open, n, close] => {
                    open.is_symbol("(") && n.kind == TokenKind::Number && close.is_symbol(")")
                }
                _ => false,
            };
            precision_only.then(|| t.text.to_ascii_uppercase())
        }
        _ => None,
    }
}

fn create_index(p: &mut Parser<'_>) -> ParseResult<SourceIndex> {
    p.expect_word("CREATE")?;
    let unique = p.eat_word("UNIQUE");
    let kind = if p.eat_word("FULLTEXT") {
        IndexKind::Fulltext
    } else if p.eat_word("SPATIAL") {
        IndexKind::Spatial
    } else {
        IndexKind::Regular
    };
    p.expect_word("INDEX")?;
    p.eat_word("CONCURRENTLY");
    p.eat_words(&["IF", "NOT", "EXISTS"]);

    let mut name = None;
    if !p.peek_word("ON") && !p.peek_word("USING") {
        name = Some(p.qualified_name()?.1);
    }
    let mut method = using_method(p);
    p.expect_word("ON")?;
    p.eat_word("ONLY");
    let (schema, table) = p.qualified_name()?;
    if method.is_none() {
        method = using_method(p);
    }
    let group = p.group()?;
    let keys = index_keys(p, group)?;

    let mut predicate = None;
    while !p.at_end() {
        if p.eat_word("WHERE") {
            predicate = Some(p.text_of(p.rest()));
            break;
        }
        if method.is_none()
            && let Some(m) = using_method(p)
        {
            method = Some(m);
            continue;
        }
        p.skip_item()?;
    }

    let name = name.unwrap_or_else(|| {
        let columns: Vec<&str> = keys
            .iter()
            .filter_map(|k| match k {
                IndexKey::Column { name, .. } => Some(name.as_str()),
                IndexKey::Expression(_) => None,
            })
            .collect();
        format!("{}_{}_idx", table, columns.join("_"))
    });

    let mut index = SourceIndex::new(name, table, keys);
    index.schema = schema;
    index.unique = unique;
    index.kind = kind;
    index.method = method;
    index.predicate = predicate;
    Ok(index)
}

fn alter_table(
    p: &mut Parser<'_>,
) -> ParseResult<(Option<String>, String, Vec<TableConstraint>)> {
    p.expect_word("ALTER")?;
    p.expect_word("TABLE")?;
    p.eat_words(&["IF", "EXISTS"]);
    p.eat_word("ONLY");
    let (schema, table) = p.qualified_name()?;

    let mut constraints = Vec::new();
    for action in split_commas(p.rest()) {
        let mut ap = Parser {
            sql: p.sql,
            tokens: action,
            pos: 0,
        };
        if ap.eat_word("ADD") {
            if let Some(constraint) = table_constraint(&mut ap)? {
                constraints.push(constraint);
            }
        } else if ap.eat_word("ALTER") {
            ap.eat_word("COLUMN");
            let Ok(column) = ap.ident() else {
                continue;
            };
            let default = if ap.eat_words(&["SET", "DEFAULT"]) {
                Some(classify_default_tokens(&ap, ap.rest()))
            } else if ap.eat_words(&["DROP", "DEFAULT"]) {
                None
            } else {
                continue;
            };
            constraints.push(TableConstraint::ColumnDefault { column, default });
        }
    }
    Ok((schema, table, constraints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mysql_create_table() {
        let sql = indoc! {"
            CREATE TABLE IF NOT EXISTS `orders` (
              `id` int unsigned NOT NULL AUTO_INCREMENT,
              `customer_id` int NOT NULL,
              `status` enum('new','paid') NOT NULL DEFAULT 'new' COMMENT 'lifecycle',
              `total` decimal(10,2) DEFAULT NULL,
              `created_at` timestamp NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
              PRIMARY KEY (`id`),
              UNIQUE KEY `uq_ref` (`customer_id`),
              KEY `idx_status` (`status`) USING BTREE,
              CONSTRAINT `fk_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE,
              CONSTRAINT `chk_total` CHECK ((`total` >= 0))
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 /*!50100 PARTITION BY HASH (id) */;
        "};
        let table = parse_create_table(sql).unwrap();

        assert_eq!(table.name, "orders");
        assert_eq!(
            table.column_names(),
            vec!["id", "customer_id", "status", "total", "created_at"]
        );
        assert_eq!(table.columns[0].declared_type, "int unsigned");
        assert_eq!(table.columns[2].declared_type, "enum('new','paid')");
        assert_eq!(table.columns[3].declared_type, "decimal(10,2)");
        assert_eq!(table.primary_key, vec!["id"]);
        assert!(table.columns[0].not_null);
        assert_eq!(
            table.columns[2].default,
            Some(SourceDefault::Literal("'new'".into()))
        );
        assert_eq!(
            table.columns[4].default,
            Some(SourceDefault::Literal("CURRENT_TIMESTAMP".into()))
        );

        let names: Vec<&str> = table.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["uq_ref", "idx_status"]);
        assert!(table.indexes[0].unique);
        assert_eq!(table.indexes[1].method.as_deref(), Some("btree"));

        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].referenced_table, "customers");
        assert_eq!(table.dropped_constructs.len(), 2);
    }

    #[test]
    fn test_postgres_create_table() {
        let sql = indoc! {r#"
            CREATE TABLE public.users (
                id integer NOT NULL,
                email character varying(255) NOT NULL,
                name text DEFAULT 'anon'::text,
                active boolean DEFAULT true,
                score double precision,
                tags text[],
                created timestamp without time zone DEFAULT now(),
                CONSTRAINT users_pk PRIMARY KEY (id, email),
                UNIQUE (name)
            );
        "#};
        let table = parse_create_table(sql).unwrap();

        assert_eq!(table.schema.as_deref(), Some("public"));
        assert_eq!(table.columns[1].declared_type, "character varying(255)");
        assert_eq!(table.columns[4].declared_type, "double precision");
        assert_eq!(table.columns[5].declared_type, "text[]");
        assert_eq!(table.columns[6].declared_type, "timestamp without time zone");
        assert_eq!(table.primary_key, vec!["id", "email"]);
        assert!(table.columns[2].unique);
        assert_eq!(
            table.columns[2].default,
            Some(SourceDefault::Literal("'anon'".into()))
        );
        assert_eq!(
            table.columns[3].default,
            Some(SourceDefault::Literal("TRUE".into()))
        );
        assert_eq!(
            table.columns[6].default,
            Some(SourceDefault::Expression("now()".into()))
        );
    }

    #[test]
    fn test_sqlite_create_table() {
        let sql = indoc! {"
            CREATE TABLE [notes] (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body TEXT NOT NULL CHECK (length(body) > 0),
                parent INTEGER REFERENCES notes(id),
                untyped
            )
        "};
        let table = parse_create_table(sql).unwrap();
        assert_eq!(table.name, "notes");
        assert_eq!(table.primary_key, vec!["id"]);
        assert_eq!(table.columns[3].declared_type, "");
        assert_eq!(table.foreign_keys[0].referenced_column, "id");
        assert_eq!(
            table.dropped_constructs,
            vec!["CHECK constraint on column 'body'".to_string()]
        );
    }

    #[test]
    fn test_malformed_create_table_is_error() {
        assert!(parse_create_table("CREATE TABLE t (id int, name varchar(10)").is_err());
        assert!(parse_create_table("CREATE TABLE t ()").is_err());
        assert!(parse_create_table("CREATE TABLE t (id int, PRIMARY KEY (missing))").is_err());
        assert!(parse_create_table("CREATE TABLE t AS SELECT 1").is_err());
        assert!(parse_create_table("CREATE TABLE t (name varchar(10) DEFAULT 'x)").is_err());
    }

    #[test]
    fn test_create_index_shapes() {
        let plain = parse_create_index("CREATE INDEX idx_a ON t (a);").unwrap();
        assert_eq!(plain.column_names(), vec!["a"]);
        assert!(plain.predicate.is_none());
        assert_eq!(plain.schema, None);

        let expr = parse_create_index("CREATE INDEX idx_lower ON public.t USING btree (lower(email))")
            .unwrap();
        assert!(matches!(expr.keys[0], IndexKey::Expression(ref e) if e == "lower(email)"));
        assert_eq!(expr.table, "t");
        assert_eq!(expr.schema.as_deref(), Some("public"));

        let partial =
            parse_create_index("CREATE UNIQUE INDEX p ON t (a) WHERE deleted_at IS NULL").unwrap();
        assert!(partial.unique);
        assert_eq!(partial.predicate.as_deref(), Some("deleted_at IS NULL"));

        let gin = parse_create_index("CREATE INDEX g ON t USING gin (tags)").unwrap();
        assert_eq!(gin.method.as_deref(), Some("gin"));

        let prefix = parse_create_index("CREATE INDEX pre ON t (name(10))").unwrap();
        assert_eq!(
            prefix.keys[0],
            IndexKey::Column {
                name: "name".into(),
                prefix_length: Some(10)
            }
        );

        let sorted = parse_create_index("CREATE INDEX s ON t (a COLLATE NOCASE DESC)").unwrap();
        assert_eq!(sorted.column_names(), vec!["a"]);
    }

    #[test]
    fn test_alter_table_constraints() {
        let stmt = parse_statement(
            "ALTER TABLE ONLY public.orders ADD CONSTRAINT orders_pkey PRIMARY KEY (id);",
        )
        .unwrap();
        match stmt {
            Some(DdlStatement::AlterTable {
                schema,
                table,
                constraints,
            }) => {
                assert_eq!(schema.as_deref(), Some("public"));
                assert_eq!(table, "orders");
                assert_eq!(constraints, vec![TableConstraint::PrimaryKey(vec!["id".into()])]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let stmt =
            parse_statement("ALTER TABLE `t` ADD PRIMARY KEY (`id`), ADD KEY `k` (`a`)").unwrap();
        let Some(DdlStatement::AlterTable { constraints, .. }) = stmt else {
            panic!("not an alter");
        };
        assert_eq!(constraints.len(), 2);

        assert_eq!(
            parse_statement("ALTER TABLE t OWNER TO bob").unwrap(),
            Some(DdlStatement::AlterTable {
                schema: None,
                table: "t".into(),
                constraints: vec![]
            })
        );
        assert_eq!(parse_statement("SET NAMES utf8mb4").unwrap(), None);
    }

    #[test]
    fn test_alter_column_defaults() {
        let stmt = parse_statement(
            "ALTER TABLE ONLY public.users ALTER COLUMN id SET DEFAULT nextval('public.users_id_seq'::regclass);",
        )
        .unwrap();
        let Some(DdlStatement::AlterTable { constraints, .. }) = stmt else {
            panic!("not an alter");
        };
        assert_eq!(
            constraints,
            vec![TableConstraint::ColumnDefault {
                column: "id".into(),
                default: Some(SourceDefault::Expression(
                    "nextval('public.users_id_seq'::regclass)".into()
                )),
            }]
        );

        let stmt = parse_statement(
            "ALTER TABLE t ALTER status SET DEFAULT 'new', ALTER COLUMN note DROP DEFAULT, ALTER COLUMN x TYPE text",
        )
        .unwrap();
        let Some(DdlStatement::AlterTable { constraints, .. }) = stmt else {
            panic!("not an alter");
        };
        assert_eq!(
            constraints,
            vec![
                TableConstraint::ColumnDefault {
                    column: "status".into(),
                    default: Some(SourceDefault::Literal("'new'".into())),
                },
                TableConstraint::ColumnDefault {
                    column: "note".into(),
                    default: None,
                },
            ]
        );

        let mut table = SourceTable::new("users")
            .with_columns(vec![SourceColumn::new("id", "integer")]);
        let default = Some(SourceDefault::Literal("0".into()));
        apply_constraint(
            &mut table,
            TableConstraint::ColumnDefault { column: "id".into(), default: default.clone() },
        )
        .unwrap();
        assert_eq!(table.columns[0].default, default);
        assert_eq!(
            apply_constraint(
                &mut table,
                TableConstraint::ColumnDefault { column: "nope".into(), default: None },
            ),
            Err("nope".to_string())
        );
    }

    #[test]
    fn test_classify_default_text() {
        assert_eq!(classify_default("0"), SourceDefault::Literal("0".into()));
        assert_eq!(classify_default("-1.5"), SourceDefault::Literal("-1.5".into()));
        assert_eq!(classify_default("'it''s'"), SourceDefault::Literal("'it''s'".into()));
        assert_eq!(
            classify_default("CURRENT_TIMESTAMP(6)"),
            SourceDefault::Literal("CURRENT_TIMESTAMP".into())
        );
        assert_eq!(classify_default("('x')"), SourceDefault::Literal("'x'".into()));
        assert_eq!(
            classify_default("nextval('seq'::regclass)"),
            SourceDefault::Expression("nextval('seq'::regclass)".into())
        );
        assert_eq!(
            classify_default("(datetime('now'))"),
            SourceDefault::Expression("datetime('now')".into())
        );
    }
}
