//! Streaming SQL statement scanner
//!
//! Splits a dump into statements on `;` outside quotes and comments, reading
//! one line at a time so arbitrarily large dumps stay in bounded memory.
//! PostgreSQL `COPY ... FROM stdin` data blocks are recognised and reported
//! with their byte offset instead of being treated as SQL.

use std::io::{self, BufRead};

/// Quoting rules in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Backslash escapes in strings, `#` comments
    #[default]
    MySql,
    /// Standard-conforming strings, dollar quoting
    Postgres,
}

/// One statement, comments removed, without the terminating `;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedStatement {
    /// Byte offset of the statement's first character in the stream
    pub offset: u64,
    pub text: Vec<u8>,
}

impl ScannedStatement {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.text).into_owned()
    }

    /// The first `n` words, upper-cased
    pub fn keywords(&self, n: usize) -> Vec<String> {
        leading_keywords(&self.text, n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    Statement(ScannedStatement),
    /// A `COPY ... FROM stdin` data block following the previous statement
    CopyData {
        /// Offset of the first data line
        offset: u64,
        rows: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    LineComment,
    BlockComment,
    Quoted(u8),
    Dollar(Vec<u8>),
}

pub struct StatementScanner<R> {
    reader: R,
    line: Vec<u8>,
    pos: usize,
    /// Offset of `line[0]`
    line_offset: u64,
    dialect: Dialect,
    pending_copy: bool,
}

impl<R: BufRead> StatementScanner<R> {
    pub fn new(reader: R) -> Self {
        Self::starting_at(reader, 0, Dialect::default())
    }

    /// Scanner over a reader already positioned at `offset`
    pub fn starting_at(reader: R, offset: u64, dialect: Dialect) -> Self {
        Self {
            reader,
            line: Vec::new(),
            pos: 0,
            line_offset: offset,
            dialect,
            pending_copy: false,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Offset of the next unread byte
    pub fn offset(&self) -> u64 {
        self.line_offset + self.pos as u64
    }

    fn fill_line(&mut self) -> io::Result<bool> {
        self.line_offset += self.line.len() as u64;
        self.line.clear();
        self.pos = 0;
        Ok(self.reader.read_until(b'\n', &mut self.line)? > 0)
    }

    /// Advance to `offset`, discarding everything before it
    pub fn skip_to(&mut self, offset: u64) -> io::Result<()> {
        if offset < self.offset() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot rewind from {} to {}", self.offset(), offset),
            ));
        }
        loop {
            let line_end = self.line_offset + self.line.len() as u64;
            if offset <= line_end {
                self.pos = (offset - self.line_offset) as usize;
                return Ok(());
            }
            if !self.fill_line()? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ends before offset {}", offset),
                ));
            }
        }
    }

    /// Read the rest of the current line, or the next one, into `buf`
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        if self.pos >= self.line.len() && !self.fill_line()? {
            return Ok(false);
        }
        buf.extend_from_slice(&self.line[self.pos..]);
        self.pos = self.line.len();
        Ok(true)
    }

    pub fn next_item(&mut self) -> io::Result<Option<ScanItem>> {
        if self.pending_copy {
            self.pending_copy = false;
            return self.skip_copy_data().map(Some);
        }

        let mut text = Vec::new();
        let mut start: Option<u64> = None;
        let mut state = State::Normal;

        loop {
            if self.pos >= self.line.len() && !self.fill_line()? {
                // unterminated final statement
                return Ok(start.map(|offset| ScanItem::Statement(ScannedStatement { offset, text })));
            }

            let b = self.line[self.pos];
            let next = self.line.get(self.pos + 1).copied();
            let here = self.offset();

            match &state {
                State::Normal => match b {
                    b'-' if next == Some(b'-') => {
                        state = State::LineComment;
                        self.pos += 2;
                        continue;
                    }
                    b'#' if self.dialect == Dialect::MySql => state = State::LineComment,
                    b'/' if next == Some(b'*') => {
                        if start.is_some() {
                            text.push(b' ');
                        }
                        state = State::BlockComment;
                        self.pos += 2;
                        continue;
                    }
                    b';' => {
                        self.pos += 1;
                        if let Some(offset) = start {
                            let statement = ScannedStatement { offset, text };
                            self.after_statement(&statement);
                            return Ok(Some(ScanItem::Statement(statement)));
                        }
                        continue;
                    }
                    b'\'' | b'"' | b'`' => {
                        start.get_or_insert(here);
                        text.push(b);
                        state = State::Quoted(b);
                    }
                    b'$' if self.dialect == Dialect::Postgres => {
                        if let Some(tag) = dollar_tag(&self.line[self.pos..]) {
                            start.get_or_insert(here);
                            text.extend_from_slice(&tag);
                            self.pos += tag.len();
                            state = State::Dollar(tag);
                            continue;
                        }
                        start.get_or_insert(here);
                        text.push(b);
                    }
                    _ => {
                        if start.is_none() && !b.is_ascii_whitespace() {
                            start = Some(here);
                        }
                        if start.is_some() {
                            text.push(b);
                        }
                    }
                },
                State::LineComment => {
                    if b == b'\n' {
                        if start.is_some() {
                            text.push(b'\n');
                        }
                        state = State::Normal;
                    }
                }
                State::BlockComment => {
                    if b == b'*' && next == Some(b'/') {
                        state = State::Normal;
                        self.pos += 2;
                        continue;
                    }
                }
                State::Quoted(quote) => {
                    let quote = *quote;
                    text.push(b);
                    // MySQL string literals take backslash escapes in either quote style
                    if quote != b'`' && b == b'\\' && self.dialect == Dialect::MySql {
                        if let Some(escaped) = next {
                            text.push(escaped);
                            self.pos += 2;
                            continue;
                        }
                    } else if b == quote {
                        if next == Some(quote) {
                            text.push(quote);
                            self.pos += 2;
                            continue;
                        }
                        state = State::Normal;
                    }
                }
                State::Dollar(tag) => {
                    if self.line[self.pos..].starts_with(tag) {
                        let len = tag.len();
                        text.extend_from_slice(&self.line[self.pos..self.pos + len]);
                        self.pos += len;
                        state = State::Normal;
                        continue;
                    }
                    text.push(b);
                }
            }
            self.pos += 1;
        }
    }

    fn after_statement(&mut self, statement: &ScannedStatement) {
        let words = statement.keywords(2);
        match words.first().map(String::as_str) {
            Some("COPY") => {
                let trimmed = statement.text.trim_ascii_end();
                if trimmed.len() >= 5 && trimmed[trimmed.len() - 5..].eq_ignore_ascii_case(b"stdin") {
                    self.pending_copy = true;
                    self.dialect = Dialect::Postgres;
                }
            }
            Some("SET") if words.get(1).is_some_and(|w| w == "STANDARD_CONFORMING_STRINGS") => {
                let text = statement.text_lossy().to_ascii_lowercase();
                let value = text
                    .split_once('=')
                    .or_else(|| text.split_once(" to "))
                    .map(|(_, v)| v.trim().trim_matches('\''));
                if value == Some("on") {
                    self.dialect = Dialect::Postgres;
                }
            }
            _ => {}
        }
    }

    fn skip_copy_data(&mut self) -> io::Result<ScanItem> {
        // the rest of the COPY line carries no data
        self.pos = self.line.len();
        let offset = self.line_offset + self.line.len() as u64;
        let mut rows = 0;
        while self.fill_line()? {
            self.pos = self.line.len();
            if is_copy_terminator(&self.line) {
                break;
            }
            rows += 1;
        }
        Ok(ScanItem::CopyData { offset, rows })
    }
}

/// `\.` on a line of its own ends a COPY data block
pub fn is_copy_terminator(line: &[u8]) -> bool {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line == b"\\."
}

fn dollar_tag(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut j = 1;
    if bytes.get(j).is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    (bytes.get(j) == Some(&b'$')).then(|| bytes[..=j].to_vec())
}

/// Upper-cased leading words of a statement, stopping at the first
/// non-word character other than whitespace
pub fn leading_keywords(text: &[u8], n: usize) -> Vec<String> {
    let mut words = Vec::with_capacity(n);
    let mut i = 0;
    while words.len() < n && i < text.len() {
        while i < text.len() && text[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < text.len() && (text[i].is_ascii_alphanumeric() || text[i] == b'_') {
            i += 1;
        }
        if i == start {
            break;
        }
        words.push(String::from_utf8_lossy(&text[start..i]).to_ascii_uppercase());
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn statements(sql: &str) -> Vec<String> {
        let mut scanner = StatementScanner::new(sql.as_bytes());
        let mut out = Vec::new();
        while let Some(item) = scanner.next_item().unwrap() {
            if let ScanItem::Statement(s) = item {
                out.push(s.text_lossy().trim().to_string());
            }
        }
        out
    }

    #[test]
    fn test_splits_on_semicolons_outside_quotes_and_comments() {
        let sql = indoc! {r#"
            -- header; not a statement
            /*!40101 SET NAMES utf8mb4 */;
            CREATE TABLE `a;b` (x varchar(3) DEFAULT ';');
            # mysql comment;
            INSERT INTO `a;b` VALUES ('it\'s;'),('x''y;');
        "#};
        assert_eq!(
            statements(sql),
            vec![
                "CREATE TABLE `a;b` (x varchar(3) DEFAULT ';')",
                r"INSERT INTO `a;b` VALUES ('it\'s;'),('x''y;')",
            ]
        );
    }

    #[test]
    fn test_mysql_double_quoted_strings_take_backslash_escapes() {
        let sql = indoc! {r#"
            INSERT INTO t VALUES ("a\"; b", 1),("c\\", 2);
            SELECT 1;
        "#};
        assert_eq!(
            statements(sql),
            vec![r#"INSERT INTO t VALUES ("a\"; b", 1),("c\\", 2)"#, "SELECT 1"]
        );
    }

    #[test]
    fn test_copy_block_reported_with_offset() {
        let sql = indoc! {r"
            SET standard_conforming_strings = on;
            COPY public.t (id, name) FROM stdin;
            1	a;b
            2	\N
            \.
            CREATE INDEX t_name ON public.t USING btree (name);
        "};
        let mut scanner = StatementScanner::new(sql.as_bytes());
        let mut items = Vec::new();
        while let Some(item) = scanner.next_item().unwrap() {
            items.push(item);
        }
        assert_eq!(items.len(), 4);
        let ScanItem::CopyData { offset, rows } = items[2] else {
            panic!("expected copy data, got {:?}", items[2]);
        };
        assert_eq!(rows, 2);
        assert!(sql[offset as usize..].starts_with("1\ta;b\n"));
        assert_eq!(scanner.dialect(), Dialect::Postgres);
        match &items[3] {
            ScanItem::Statement(s) => assert_eq!(s.keywords(2), vec!["CREATE", "INDEX"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_postgres_strings_and_dollar_quotes() {
        let sql = indoc! {r"
            SET standard_conforming_strings = on;
            CREATE FUNCTION f() RETURNS int AS $body$ SELECT 1; $body$ LANGUAGE sql;
            INSERT INTO t VALUES ('C:\');
        "};
        let stmts = statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].ends_with("LANGUAGE sql"));
        assert_eq!(stmts[2], r"INSERT INTO t VALUES ('C:\')");
    }

    #[test]
    fn test_statement_offsets_and_skip_to() {
        let sql = "SELECT 1;\n  INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n";
        let mut scanner = StatementScanner::new(sql.as_bytes());
        let mut offsets = Vec::new();
        while let Some(ScanItem::Statement(s)) = scanner.next_item().unwrap() {
            offsets.push(s.offset);
        }
        assert_eq!(offsets, vec![0, 12, 38]);

        let mut scanner = StatementScanner::new(sql.as_bytes());
        scanner.skip_to(38).unwrap();
        let Some(ScanItem::Statement(s)) = scanner.next_item().unwrap() else {
            panic!("no statement");
        };
        assert_eq!(s.text_lossy(), "INSERT INTO t VALUES (2)");
        assert!(scanner.skip_to(0).is_err());
    }

    #[test]
    fn test_unterminated_final_statement_is_returned() {
        assert_eq!(statements("SELECT 1;\nSELECT 2"), vec!["SELECT 1", "SELECT 2"]);
        assert!(statements("  -- only a comment\n").is_empty());
    }

    #[test]
    fn test_leading_keywords() {
        assert_eq!(
            leading_keywords(b"  create unique index x", 3),
            vec!["CREATE", "UNIQUE", "INDEX"]
        );
        assert_eq!(leading_keywords(b"INSERT INTO `t`", 5), vec!["INSERT", "INTO"]);
    }
}
