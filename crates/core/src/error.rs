//! Error types for zenodo-upload-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for zenodo-upload-core
pub type Result<T> = std::result::Result<T, Error>;

/// Precondition and configuration errors.
///
/// These abort a run before any file is transferred. Per-file transfer
/// problems are reported as [`UploadFailure`] and end up in the run summary.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// Root directory does not exist
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    /// Root path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Descent into a directory was refused
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Directory traversal failed for another reason
    #[error("Failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },

    /// Two files would be stored under the same name in the deposit
    #[error("{first} and {second} would both be uploaded as '{name}'")]
    DuplicateRemoteName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// Access token missing or empty
    #[error("Missing access token")]
    MissingToken,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(PathBuf::from).unwrap_or_default();
        match err.io_error().map(|e| e.kind()) {
            Some(std::io::ErrorKind::PermissionDenied) => Error::PermissionDenied(path),
            Some(std::io::ErrorKind::NotFound) => Error::NotFound(path),
            _ => Error::Walk {
                path,
                message: err.to_string(),
            },
        }
    }
}

/// Whether a failed transfer is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: network trouble, timeouts, 5xx, 429
    Retryable,
    /// Permanent: bad token, unknown deposit, malformed request
    Fatal,
}

/// A failed upload of a single file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct UploadFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl UploadFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }

    /// Prefix the reason with the request that failed
    pub fn context(mut self, context: impl std::fmt::Display) -> Self {
        self.reason = format!("{}: {}", context, self.reason);
        self
    }

    /// Classify an HTTP status returned by the repository service.
    ///
    /// Returns `None` for success codes.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Option<Self> {
        if status.is_success() {
            return None;
        }

        let code = status.as_u16();
        let detail = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            body.trim().to_string()
        };

        let failure = match code {
            401 => Self::fatal(format!("HTTP 401: invalid access token ({})", detail)),
            403 => Self::fatal(format!("HTTP 403: insufficient permissions ({})", detail)),
            404 => Self::fatal(format!("HTTP 404: not found ({})", detail)),
            408 | 429 => Self::retryable(format!("HTTP {}: {}", code, detail)),
            500..=599 => Self::retryable(format!("HTTP {}: {}", code, detail)),
            _ => Self::fatal(format!("HTTP {}: {}", code, detail)),
        };

        Some(failure)
    }
}

impl From<reqwest::Error> for UploadFailure {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if let Some(failure) = Self::from_status(status, "") {
                return failure;
            }
        }

        if err.is_timeout() {
            Self::retryable(format!("request timed out: {}", err))
        } else if err.is_connect() {
            Self::retryable(format!("connection failed: {}", err))
        } else if err.is_builder() {
            Self::fatal(format!("malformed request: {}", err))
        } else if err.is_decode() {
            Self::retryable(format!("unreadable response: {}", err))
        } else {
            Self::retryable(format!("network error: {}", err))
        }
    }
}
