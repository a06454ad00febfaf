//! `zqlz-import`: load a SQLite file, a MySQL Shell dump directory or a SQL
//! dump into a new SQLite database.

mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use zqlz_import::{
    ImportPhase, ImportProgressSnapshot, ImportReport, Importer, SqliteTarget, progress_channel,
    spawn_import,
};

use crate::config::{ImportConfig, SourceKind};

/// Exit status of an interrupted run, as shells report SIGINT
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "zqlz-import",
    version,
    about = "Import a database export into a new SQLite database"
)]
struct Cli {
    /// SQLite file, dump directory or SQL dump (.sql, .sql.gz, .sql.zst)
    source: Option<PathBuf>,

    /// SQLite database to create
    target: Option<PathBuf>,

    /// Source kind; detected from the path when omitted
    #[arg(long, value_enum)]
    kind: Option<SourceKind>,

    /// Config file (default: <config dir>/zqlz/import.toml)
    #[arg(short, long, env = "ZQLZ_IMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Replace the target if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Rows per target transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Only import this table (repeatable)
    #[arg(long = "table", value_name = "TABLE")]
    tables: Vec<String>,

    /// Skip this table (repeatable)
    #[arg(long = "exclude", value_name = "TABLE")]
    exclude: Vec<String>,

    /// Rename a table in the target, as SOURCE=TARGET (repeatable)
    #[arg(long = "map", value_name = "SOURCE=TARGET", value_parser = parse_mapping)]
    mappings: Vec<(String, String)>,

    /// Do not recreate indexes
    #[arg(long)]
    no_indexes: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Hide progress lines
    #[arg(short, long)]
    quiet: bool,

    /// More logging (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_mapping(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => {
            Ok((source.to_string(), target.to_string()))
        }
        _ => Err(format!("expected SOURCE=TARGET, got '{}'", value)),
    }
}

impl Cli {
    /// Layer command line flags over the config file
    fn apply(&self, config: &mut ImportConfig) {
        if let Some(source) = &self.source {
            config.source.path = Some(source.clone());
        }
        if self.kind.is_some() {
            config.source.kind = self.kind;
        }
        if let Some(target) = &self.target {
            config.target.path = Some(target.clone());
        }
        config.target.overwrite |= self.overwrite;

        let options = &mut config.import;
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if !self.tables.is_empty() {
            options.include_tables = self.tables.clone();
        }
        options.exclude_tables.extend(self.exclude.iter().cloned());
        options.table_mappings.extend(self.mappings.iter().cloned());
        if self.no_indexes {
            options.create_indexes = false;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "import aborted");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ImportConfig::load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.import.validate().context("Invalid import options")?;

    let _log_guard = logging::init(logging::LoggingConfig::from_settings(
        &config.logging,
        cli.verbose,
    ))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(import(config, cli.json, cli.quiet))
}

async fn import(config: ImportConfig, json: bool, quiet: bool) -> Result<ExitCode> {
    let source = config.source()?;
    let target_path = config.target_path()?;
    let target = SqliteTarget::create(target_path, config.target.overwrite)
        .with_context(|| format!("Failed to create target {:?}", target_path))?;

    let (progress, mut snapshots) = progress_channel();
    let importer = Importer::new(source, config.import.clone()).with_progress(progress);
    let cancel = importer.cancellation_token();

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling import");
            cancel.cancel();
        }
    });
    let printer = tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            if !quiet {
                print_progress(&snapshot);
            }
        }
    });

    let joined = spawn_import(importer, target).await;
    interrupt.abort();
    let (outcome, mut target) = joined.context("Import task panicked")?;
    // the importer (and with it the progress sender) is gone, so this ends
    let _ = printer.await;

    if let Some(cleanup) = outcome.cleanup {
        cleanup
            .perform(&mut target)
            .await
            .with_context(|| format!("Failed to remove partial target {:?}", target_path))?;
        eprintln!("removed partial target {}", target_path.display());
    }

    print_report(&outcome.report, json)?;
    Ok(match outcome.report.phase {
        ImportPhase::Complete => ExitCode::SUCCESS,
        ImportPhase::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::FAILURE,
    })
}

fn print_progress(snapshot: &ImportProgressSnapshot) {
    let fraction = snapshot
        .table_fraction()
        .map(|f| format!(" ({:.0}%)", f * 100.0))
        .unwrap_or_default();
    eprintln!(
        "[{}] {}/{} tables  {}{}",
        snapshot.phase, snapshot.tables_completed, snapshot.tables_total, snapshot.message, fraction
    );
}

fn print_report(report: &ImportReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.summary());
    if let Some(error) = &report.error {
        println!("error: {}", error);
    }
    for table in &report.tables {
        let status = if table.data_complete { "" } else { "  (incomplete)" };
        println!("  {} -> {}: {} rows{}", table.name, table.target_name, table.rows, status);
    }
    for skipped in &report.skipped_indexes {
        println!("  skipped index {} on {}: {}", skipped.index, skipped.table, skipped.reason);
    }
    for warning in &report.warnings {
        match &warning.table {
            Some(table) => println!("  warning [{}]: {}", table, warning.message),
            None => println!("  warning: {}", warning.message),
        }
    }
    Ok(())
}
