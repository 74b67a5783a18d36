//! Data carried through an upload run

use std::fmt;
use std::path::PathBuf;

/// One file scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Size in bytes at enumeration time
    pub size: u64,
    /// Name used as the remote file key
    pub relative_name: String,
}

/// Result of a single try
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

/// One try at uploading a task
#[derive(Debug, Clone)]
pub struct UploadAttempt<'a> {
    pub task: &'a UploadTask,
    /// Starts at 1
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// Final state of a task after all attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    Success,
    Failed(String),
}

impl FinalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FinalOutcome::Success)
    }
}

impl fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalOutcome::Success => write!(f, "uploaded"),
            FinalOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-task result collected by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub task: UploadTask,
    pub final_outcome: FinalOutcome,
    pub attempts_made: u32,
}

/// Summary of a whole run, returned to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks that reached a final outcome (`succeeded + failed`)
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In processing order
    pub results: Vec<UploadResult>,
    /// The run was interrupted before every task was processed
    pub cancelled: bool,
    /// Tasks never attempted because of cancellation
    pub skipped: usize,
}

impl RunSummary {
    pub(crate) fn from_results(results: Vec<UploadResult>, cancelled: bool, skipped: usize) -> Self {
        let succeeded = results
            .iter()
            .filter(|r| r.final_outcome.is_success())
            .count();
        let failed = results.len() - succeeded;

        Self {
            total_files: results.len(),
            succeeded,
            failed,
            results,
            cancelled,
            skipped,
        }
    }

    /// Results that did not end in success
    pub fn failures(&self) -> impl Iterator<Item = &UploadResult> {
        self.results.iter().filter(|r| !r.final_outcome.is_success())
    }

    /// Every task completed successfully and nothing was skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

/// Live counters behind the two progress bars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub files_done: usize,
    pub files_total: usize,
    pub current_file_bytes_sent: u64,
    pub current_file_bytes_total: u64,
}
