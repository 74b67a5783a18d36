//! zenodo-upload-core - Core library for the zenodo-upload CLI
//!
//! This library provides the resilient upload pipeline: file discovery,
//! chunked streaming uploads to a Zenodo deposit, exponential backoff per
//! file and two-level progress reporting.

pub mod backoff;
pub mod client;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod progress;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use client::{UploadClient, ZenodoClient};
pub use config::{get_config_path, load_config, load_config_from, validate_config};
pub use config::{
    ConfigFile, DepositTarget, LoggingConfig, RetryConfig, RunConfig, UploadConfig, ZenodoConfig,
    ZENODO_BASE_URL, ZENODO_SANDBOX_URL,
};
pub use enumerator::FileEnumerator;
pub use error::{Error, FailureKind, Result, UploadFailure};
pub use model::{
    AttemptOutcome, FinalOutcome, ProgressState, RunSummary, UploadAttempt, UploadResult, UploadTask,
};
pub use orchestrator::{UploadOrchestrator, CANCELLED_REASON};
pub use progress::{LogReporter, NoopReporter, ProgressReporter, TerminalReporter};
