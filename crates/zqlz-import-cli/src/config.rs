//! `import.toml` configuration
//!
//! ```toml
//! [source]
//! kind = "dump-directory"   # sqlite | dump-directory | sql-dump
//! path = "/backups/shop"
//!
//! [target]
//! path = "shop.db"
//! overwrite = false
//!
//! [import]
//! batch_size = 5000
//! exclude_tables = ["audit_log"]
//!
//! [logging]
//! filter = "info,zqlz_import=debug"
//! json_logs = true
//! ```
//!
//! Command line flags override whatever the file sets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use zqlz_import::{ImportOptions, ImportSource};

/// Which reader handles the source path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[serde(rename = "sqlite")]
    #[value(name = "sqlite")]
    SqliteFile,
    DumpDirectory,
    SqlDump,
}

impl SourceKind {
    /// Guess the kind from the path: directories are dumps, `.sql` files
    /// (optionally `.gz`/`.zst` compressed) are SQL dumps, anything else is
    /// treated as a SQLite database.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() {
            return SourceKind::DumpDirectory;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let name = name
            .strip_suffix(".gz")
            .or_else(|| name.strip_suffix(".zst"))
            .unwrap_or(&name);
        if name.ends_with(".sql") {
            SourceKind::SqlDump
        } else {
            SourceKind::SqliteFile
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Detected from `path` when unset
    pub kind: Option<SourceKind>,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub path: Option<PathBuf>,
    /// Replace an existing target file
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` still wins when set
    pub filter: String,
    /// Write JSON logs to a daily rolling file
    pub json_logs: bool,
    /// Defaults to the platform data directory
    pub log_dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "warn,zqlz_import=info,zqlz_import_cli=info".to_string(),
            json_logs: false,
            log_dir: None,
        }
    }
}

/// Everything one invocation needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub import: ImportOptions,
    pub logging: LogSettings,
}

impl ImportConfig {
    /// `<config dir>/zqlz/import.toml`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .context("Could not determine config directory")
            .map(|p| p.join("zqlz").join("import.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.import.validate()?;
        Ok(config)
    }

    /// Load an explicitly named file, or the default file when it exists
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Ok(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn source(&self) -> Result<ImportSource> {
        let Some(path) = self.source.path.clone() else {
            bail!("no source given; pass a path or set [source] path in the config");
        };
        let kind = self.source.kind.unwrap_or_else(|| SourceKind::detect(&path));
        tracing::debug!(?kind, path = %path.display(), "resolved import source");
        Ok(match kind {
            SourceKind::SqliteFile => ImportSource::sqlite_file(path),
            SourceKind::DumpDirectory => ImportSource::dump_directory(path),
            SourceKind::SqlDump => ImportSource::sql_dump(path),
        })
    }

    pub fn target_path(&self) -> Result<&Path> {
        self.target
            .path
            .as_deref()
            .context("no target given; pass a path or set [target] path in the config")
    }
}
