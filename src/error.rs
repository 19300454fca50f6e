//! Error types for the sync daemon

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur during synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// I/O error on the media directory (read, write or delete)
    Io,
    /// Database query or connectivity failure
    Database,
    /// A record is missing required fields or would produce a bad filename
    InvalidRecord,
    /// Invalid configuration
    Config,
}

/// Represents an error that occurred during a pass, a heartbeat probe
/// or startup
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct SyncError {
    /// The kind of error
    pub kind: SyncErrorKind,
    /// The path where the error occurred, if any
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

impl SyncError {
    /// Create a new sync error
    pub fn new(kind: SyncErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create an I/O error tied to a path
    pub fn io_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Io, Some(path), message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Database, None, message)
    }

    /// Create an invalid record error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::InvalidRecord, None, message)
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Config, None, message)
    }

    /// Whether this error came from the storage backend
    pub fn is_connectivity(&self) -> bool {
        self.kind == SyncErrorKind::Database
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::new(SyncErrorKind::Io, None, err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::database_error(err.to_string())
    }
}
