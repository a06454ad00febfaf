//! Streaming chunk reader
//!
//! A table's data may be split over several numbered, optionally compressed
//! files. This module discovers them, orders them by sequence number and
//! exposes them as one line stream, opening and decompressing each file only
//! when the previous one is exhausted.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::ChunkReadError;

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Streaming compression codec of a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Parse a codec name as written in dump metadata
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "gzip" | "gz" => Some(Self::Gzip),
            "zstd" | "zst" | "zstandard" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Guess the codec from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            Some("zst") | Some("zstd") => Self::Zstd,
            _ => Self::None,
        }
    }

    /// Data file extension a dump uses when metadata does not name one
    pub fn default_data_extension(&self) -> &'static str {
        match self {
            Self::None => "tsv",
            Self::Gzip => "tsv.gz",
            Self::Zstd => "tsv.zst",
        }
    }

    /// Open a file as a buffered, decompressed byte stream
    pub fn open(&self, path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(path)?;
        Ok(match self {
            Self::None => Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)),
            Self::Gzip => Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                flate2::read::MultiGzDecoder::new(file),
            )),
            Self::Zstd => Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                zstd::stream::read::Decoder::new(file)?,
            )),
        })
    }
}

/// One physical data file of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub path: PathBuf,
    /// `None` for a table dumped without chunking
    pub sequence: Option<u64>,
    /// Marked with the `@@` separator as the table's final chunk
    pub is_last: bool,
}

/// Find the data files of `basename` inside `dir`.
///
/// Recognised names are `<basename>.<ext>`, `<basename>@<n>.<ext>` and
/// `<basename>@@<n>.<ext>`. The result is ordered by the numeric value of
/// `n`, so chunk 10 follows chunk 9.
pub fn discover_chunks(
    dir: &Path,
    basename: &str,
    extension: &str,
) -> std::io::Result<Vec<ChunkFile>> {
    let whole_name = format!("{}.{}", basename, extension);
    let prefix = format!("{}@", basename);
    let suffix = format!(".{}", extension);

    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // symlinks and named pipes are read like plain files
        if entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        if name == whole_name {
            chunks.push(ChunkFile {
                path: entry.path(),
                sequence: None,
                is_last: true,
            });
            continue;
        }

        let Some(middle) = name
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
        else {
            continue;
        };
        let (is_last, digits) = match middle.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, middle),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(sequence) = digits.parse::<u64>() else {
            continue;
        };
        chunks.push(ChunkFile {
            path: entry.path(),
            sequence: Some(sequence),
            is_last,
        });
    }

    chunks.sort_by_key(|c| (c.sequence.is_some(), c.sequence));
    Ok(chunks)
}

/// Check that a discovered chunk list is complete.
///
/// For chunked tables the sequence must run from 0 without gaps, and when the
/// dump declares chunking the final `@@` chunk must be present and last.
pub fn validate_chunks(
    table: &str,
    chunks: &[ChunkFile],
    chunking: bool,
) -> Result<(), ChunkReadError> {
    let whole = chunks.iter().filter(|c| c.sequence.is_none()).count();
    let numbered: Vec<&ChunkFile> = chunks.iter().filter(|c| c.sequence.is_some()).collect();

    if whole > 0 && !numbered.is_empty() {
        return Err(ChunkReadError::new(
            table,
            "found both a single data file and numbered chunks",
        ));
    }
    if numbered.is_empty() {
        return Ok(());
    }

    for (expected, chunk) in numbered.iter().enumerate() {
        let sequence = chunk.sequence.unwrap_or_default();
        if sequence != expected as u64 {
            return Err(ChunkReadError::new(
                table,
                format!(
                    "chunk {} is missing (next chunk found is {})",
                    expected, sequence
                ),
            ));
        }
    }

    let last_markers = numbered.iter().filter(|c| c.is_last).count();
    if last_markers > 1 {
        return Err(ChunkReadError::new(table, "more than one final chunk"));
    }
    if let Some(marker_pos) = numbered.iter().position(|c| c.is_last)
        && marker_pos != numbered.len() - 1
    {
        return Err(ChunkReadError::new(
            table,
            format!(
                "chunks found after the final chunk {}",
                numbered[marker_pos].sequence.unwrap_or_default()
            ),
        ));
    }
    if chunking && last_markers == 0 {
        return Err(ChunkReadError::new(
            table,
            format!(
                "final chunk missing; last chunk found is {}",
                numbered.len() - 1
            ),
        ));
    }
    Ok(())
}

/// Reads lines across a table's ordered chunks
pub struct ChunkLineReader {
    table: String,
    compression: Compression,
    pending: VecDeque<ChunkFile>,
    current: Option<(PathBuf, Box<dyn BufRead + Send>)>,
    chunks_opened: usize,
}

impl ChunkLineReader {
    pub fn new(table: impl Into<String>, chunks: Vec<ChunkFile>, compression: Compression) -> Self {
        Self {
            table: table.into(),
            compression,
            pending: chunks.into(),
            current: None,
            chunks_opened: 0,
        }
    }

    pub fn chunks_opened(&self) -> usize {
        self.chunks_opened
    }

    /// Read the next line (including its terminator) into `buf`.
    ///
    /// Returns `Ok(false)` once every chunk is exhausted.
    pub fn next_line(&mut self, buf: &mut Vec<u8>) -> Result<bool, ChunkReadError> {
        buf.clear();
        loop {
            if self.current.is_none() {
                let Some(chunk) = self.pending.pop_front() else {
                    return Ok(false);
                };
                tracing::debug!(
                    table = %self.table,
                    chunk = %chunk.path.display(),
                    "opening data chunk"
                );
                let reader = self.compression.open(&chunk.path).map_err(|e| {
                    ChunkReadError::new(
                        &self.table,
                        format!("cannot open {}: {}", chunk.path.display(), e),
                    )
                })?;
                self.chunks_opened += 1;
                self.current = Some((chunk.path, reader));
            }

            let Some((path, reader)) = self.current.as_mut() else {
                continue;
            };
            let read = reader.read_until(b'\n', buf).map_err(|e| {
                ChunkReadError::new(
                    &self.table,
                    format!("failed reading {}: {}", path.display(), e),
                )
            })?;
            if read > 0 {
                return Ok(true);
            }
            self.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn touch(dir: &Path, name: &str, contents: &[u8]) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    fn sequences(chunks: &[ChunkFile]) -> Vec<Option<u64>> {
        chunks.iter().map(|c| c.sequence).collect()
    }

    #[test]
    fn test_numeric_order_not_lexical() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 0, 9, 1, 3, 4, 5, 6, 7, 8] {
            touch(dir.path(), &format!("db@t@{}.tsv", n), b"");
        }
        touch(dir.path(), "db@t@@11.tsv", b"");

        let chunks = discover_chunks(dir.path(), "db@t", "tsv").unwrap();
        let expected: Vec<Option<u64>> = (0..=11).map(Some).collect();
        assert_eq!(sequences(&chunks), expected);
        assert!(chunks.last().unwrap().is_last);
        validate_chunks("t", &chunks, true).unwrap();
    }

    #[test]
    fn test_ignores_other_tables_and_index_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db@t@0.tsv.zst", b"");
        touch(dir.path(), "db@t@0.tsv.zst.idx", b"");
        touch(dir.path(), "db@t2@0.tsv.zst", b"");
        touch(dir.path(), "db@t.json", b"{}");
        touch(dir.path(), "db@t@x.tsv.zst", b"");
        std::fs::create_dir(dir.path().join("db@t@1.tsv.zst")).unwrap();

        let chunks = discover_chunks(dir.path(), "db@t", "tsv.zst").unwrap();
        assert_eq!(sequences(&chunks), vec![Some(0)]);
    }

    #[test]
    fn test_gap_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db@t@0.tsv", b"");
        touch(dir.path(), "db@t@@2.tsv", b"");
        let chunks = discover_chunks(dir.path(), "db@t", "tsv").unwrap();
        let err = validate_chunks("t", &chunks, true).unwrap_err();
        assert!(err.message.contains("chunk 1 is missing"), "{}", err);
    }

    #[test]
    fn test_missing_final_chunk_is_reported_when_chunking() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db@t@0.tsv", b"");
        touch(dir.path(), "db@t@1.tsv", b"");
        let chunks = discover_chunks(dir.path(), "db@t", "tsv").unwrap();
        assert!(validate_chunks("t", &chunks, true).is_err());
        assert!(validate_chunks("t", &chunks, false).is_ok());
    }

    #[test]
    fn test_reads_lines_across_compressed_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let first = zstd::stream::encode_all(&b"a\nb\n"[..], 3).unwrap();
        let second = zstd::stream::encode_all(&b"c\nd"[..], 3).unwrap();
        touch(dir.path(), "db@t@0.tsv.zst", &first);
        touch(dir.path(), "db@t@@1.tsv.zst", &second);

        let chunks = discover_chunks(dir.path(), "db@t", "tsv.zst").unwrap();
        let mut reader = ChunkLineReader::new("t", chunks, Compression::Zstd);
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while reader.next_line(&mut buf).unwrap() {
            lines.push(String::from_utf8(buf.clone()).unwrap());
        }
        assert_eq!(lines, vec!["a\n", "b\n", "c\n", "d"]);
        assert_eq!(reader.chunks_opened(), 2);
    }

    #[test]
    fn test_corrupt_chunk_is_table_scoped_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db@t.tsv.zst", b"definitely not zstd");
        let chunks = discover_chunks(dir.path(), "db@t", "tsv.zst").unwrap();
        let mut reader = ChunkLineReader::new("t", chunks, Compression::Zstd);
        let mut buf = Vec::new();
        let err = loop {
            match reader.next_line(&mut buf) {
                Ok(true) => continue,
                Ok(false) => panic!("corrupt chunk decoded cleanly"),
                Err(e) => break e,
            }
        };
        assert_eq!(err.table, "t");
    }

    #[test]
    fn test_compression_names() {
        assert_eq!(Compression::from_name("zstd"), Some(Compression::Zstd));
        assert_eq!(Compression::from_name("GZIP"), Some(Compression::Gzip));
        assert_eq!(Compression::from_name("none"), Some(Compression::None));
        assert_eq!(Compression::from_name("lz4"), None);
        assert_eq!(
            Compression::from_path(Path::new("dump.sql.gz")),
            Compression::Gzip
        );
    }
}
