//! Import phases and progress snapshots

use serde::Serialize;
use tokio::sync::mpsc;

/// Phase of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportPhase {
    /// Reading source metadata
    Analyzing,
    /// Creating target tables
    CreatingSchema,
    /// Copying rows
    CopyingData,
    /// Creating indexes after data is loaded
    CreatingIndexes,
    Complete,
    Failed,
    Cancelled,
}

impl ImportPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportPhase::Complete | ImportPhase::Failed | ImportPhase::Cancelled
        )
    }
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportPhase::Analyzing => "analyzing",
            ImportPhase::CreatingSchema => "creating schema",
            ImportPhase::CopyingData => "copying data",
            ImportPhase::CreatingIndexes => "creating indexes",
            ImportPhase::Complete => "complete",
            ImportPhase::Failed => "failed",
            ImportPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a run, handed to the progress sink by value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportProgressSnapshot {
    pub phase: ImportPhase,
    pub message: String,
    pub tables_completed: usize,
    pub tables_total: usize,
    pub current_table: Option<String>,
    pub rows_completed: u64,
    /// Unknown for sources that cannot count rows up front
    pub rows_total: Option<u64>,
    pub indexes_completed: usize,
    pub indexes_total: usize,
}

impl ImportProgressSnapshot {
    pub fn new(phase: ImportPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            tables_completed: 0,
            tables_total: 0,
            current_table: None,
            rows_completed: 0,
            rows_total: None,
            indexes_completed: 0,
            indexes_total: 0,
        }
    }

    /// Completed fraction of the current table, when its size is known
    pub fn table_fraction(&self) -> Option<f64> {
        match self.rows_total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.rows_completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Progress sink. Called from the import task; must not block.
pub type ImportProgressCallback = Box<dyn Fn(ImportProgressSnapshot) + Send + Sync>;

/// A callback that forwards snapshots into an unbounded channel, for callers
/// that consume progress on another task or thread.
pub fn progress_channel() -> (
    ImportProgressCallback,
    mpsc::UnboundedReceiver<ImportProgressSnapshot>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ImportProgressCallback = Box::new(move |snapshot| {
        // a closed receiver just means nobody is watching any more
        let _ = tx.send(snapshot);
    });
    (callback, rx)
}
