//! Error types for atomicfile.
//!
//! Uses thiserror for derive macros. Every filesystem failure carries the
//! operation that failed and the path it failed on.

use crate::exit_codes;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for lock and transaction operations.
///
/// Each variant maps to a specific process exit code for the CLI.
#[derive(Error, Debug)]
pub enum AtomicError {
    /// Invalid configuration or arguments.
    #[error("{0}")]
    UserError(String),

    /// An edit found nothing to change; the transaction was cancelled.
    #[error("{0}")]
    NotChanged(String),

    /// The lock could not be acquired within the configured timeout.
    #[error("timed out after {:.2}s waiting for lock '{}'", .waited.as_secs_f64(), .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// `break_lock(force = false)` found an entry that is not a lock marker.
    #[error(
        "refusing to break lock '{}': entry '{entry}' is not a lock marker",
        .path.display()
    )]
    LockIntegrity { path: PathBuf, entry: String },

    /// A filesystem operation failed.
    #[error("failed to {op} '{}': {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The final rename of a commit failed.
    ///
    /// The staged content is left at `temp` and the target is untouched.
    /// Recovery is manual: inspect `temp` and move it into place or delete it.
    #[error(
        "failed to replace '{}' with '{}': {source} (staged content kept for manual recovery)",
        .target.display(),
        .temp.display()
    )]
    CommitStranded {
        target: PathBuf,
        temp: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A view was requested after the transaction was closed.
    #[error("transaction on '{}' is already closed", .0.display())]
    Closed(PathBuf),
}

impl AtomicError {
    /// Wrap an I/O error with the failing operation and path.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        AtomicError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            AtomicError::UserError(_) => exit_codes::USER_ERROR,
            AtomicError::NotChanged(_) => exit_codes::NOT_CHANGED,
            AtomicError::Io { .. } | AtomicError::CommitStranded { .. } | AtomicError::Closed(_) => {
                exit_codes::IO_FAILURE
            }
            AtomicError::LockTimeout { .. } => exit_codes::LOCK_FAILURE,
            AtomicError::LockIntegrity { .. } => exit_codes::INTEGRITY_FAILURE,
        }
    }

    /// The underlying I/O error kind, if this error wraps one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            AtomicError::Io { source, .. } | AtomicError::CommitStranded { source, .. } => {
                Some(source.kind())
            }
            _ => None,
        }
    }
}

/// Result type alias for atomicfile operations.
pub type Result<T> = std::result::Result<T, AtomicError>;
