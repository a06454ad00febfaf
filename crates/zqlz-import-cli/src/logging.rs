//! Logging setup for the import command
//!
//! Human readable output goes to stderr so that a `--json` report on stdout
//! stays machine readable. Optionally a JSON log is written to a daily
//! rolling file for attaching to bug reports.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogSettings;

/// Logging configuration for one process
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where JSON log files are written
    pub log_dir: PathBuf,

    pub enable_json_logs: bool,

    /// Default filter; `RUST_LOG` takes precedence
    pub default_filter: String,

    /// Include file/line in console output
    pub include_location: bool,
}

impl LoggingConfig {
    /// Build from the `[logging]` config section. Each `-v` raises the
    /// import crates one level above the configured filter.
    pub fn from_settings(settings: &LogSettings, verbosity: u8) -> Self {
        let default_filter = match verbosity {
            0 => settings.filter.clone(),
            1 => format!("{},zqlz_import=debug,zqlz_import_cli=debug", settings.filter),
            _ => format!("{},zqlz_import=trace,zqlz_import_cli=trace", settings.filter),
        };
        Self {
            log_dir: settings.log_dir.clone().unwrap_or_else(log_directory),
            enable_json_logs: settings.json_logs,
            default_filter,
            include_location: verbosity > 1,
        }
    }
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// whole process.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(config.include_location)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "zqlz-import.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        "logging initialized"
    );
    Ok(guard)
}

/// `<data dir>/zqlz/logs`
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zqlz")
        .join("logs")
}
