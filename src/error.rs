// src/error.rs

use crate::resolver::ResolutionError;
use crate::transaction::PlanError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for rustpack
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Malformed package, database or config content
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration file problems
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Requested item does not exist
    #[error("{0}")]
    NotFoundError(String),

    /// Illegal flag combination or missing targets
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Download failed on every mirror
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Checksum did not match the expected value
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A fetched or local archive failed verification
    #[error("integrity check failed for {name}: {reason}")]
    IntegrityFailure { name: String, reason: String },

    /// Dependency resolution failed
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Transaction plan was rejected
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Another instance holds the database lock
    #[error("unable to lock database: {0} exists and is held by another process")]
    AlreadyLocked(PathBuf),

    /// A commit failed mid-way; the journal is left for recovery
    #[error("commit failed while processing {package}: {reason} (journal kept at {journal})")]
    CommitFailure {
        package: String,
        reason: String,
        journal: PathBuf,
    },

    /// A previous commit was interrupted and must be resolved first
    #[error("an interrupted transaction was found at {0}; run again with --recover resume|rollback")]
    InterruptedTransaction(PathBuf),

    /// The operator declined the confirmation prompt
    #[error("transaction cancelled")]
    Cancelled,

    /// The process received an interrupt before commit
    #[error("interrupted by user")]
    Interrupted,
}

impl Error {
    /// Process exit code for this error
    ///
    /// Distinct codes let scripts tell lock contention, resolution failures
    /// and integrity failures apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidRequest(_) => 2,
            Error::AlreadyLocked(_) => 3,
            Error::Resolution(_) | Error::Plan(_) | Error::NotFoundError(_) => 4,
            Error::DownloadError(_)
            | Error::ChecksumMismatch { .. }
            | Error::IntegrityFailure { .. } => 5,
            Error::CommitFailure { .. } | Error::InterruptedTransaction(_) => 6,
            Error::Interrupted => 130,
            _ => 1,
        }
    }
}

/// Result type alias using rustpack's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let locked = Error::AlreadyLocked(PathBuf::from("/var/lib/pacman/db.lck"));
        let integrity = Error::IntegrityFailure {
            name: "bash".to_string(),
            reason: "bad checksum".to_string(),
        };
        let commit = Error::CommitFailure {
            package: "bash".to_string(),
            reason: "disk full".to_string(),
            journal: PathBuf::from("/var/lib/pacman/transaction.journal"),
        };

        assert_eq!(locked.exit_code(), 3);
        assert_eq!(integrity.exit_code(), 5);
        assert_eq!(commit.exit_code(), 6);
        assert_eq!(Error::Cancelled.exit_code(), 1);
        assert_ne!(locked.exit_code(), integrity.exit_code());
    }
}
