//! Error types for Stowage.

use thiserror::Error;

/// Common error type for Stowage operations.
#[derive(Error, Debug)]
pub enum StowageError {
    /// Database error.
    ///
    /// This is a generic database error that wraps errors from any database backend.
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reservation was rejected because the quota cannot cover it.
    ///
    /// Reported synchronously with enough detail for the caller to
    /// self-correct.
    #[error("quota exceeded: {available} bytes available, {requested} requested")]
    QuotaExceeded {
        /// Bytes still allocatable on the quota (never negative).
        available: i64,
        /// Bytes the caller asked to reserve.
        requested: i64,
    },

    /// No upload session with the given id exists.
    #[error("upload session {0} not found")]
    UploadNotFound(String),

    /// The upload session has already reached a terminal state.
    #[error("upload session {0} is no longer active")]
    UploadNotActive(String),

    /// The upload session is past its expiry deadline.
    #[error("upload session {0} has expired")]
    UploadExpired(String),

    /// A part number outside the declared range was submitted.
    #[error("part number {part} out of range 1..={total}")]
    PartOutOfRange {
        /// The offending part number.
        part: i32,
        /// Total number of parts declared at initiate time.
        total: i32,
    },

    /// Completion was requested before every part arrived.
    #[error("incomplete upload: expected {expected} parts, got {got}")]
    IncompleteUpload {
        /// Parts the session declared.
        expected: i32,
        /// Parts actually present.
        got: i32,
    },

    /// Object storage backend failure. The compensating reservation
    /// release has already been attempted when this surfaces.
    #[error("storage backend error: {0}")]
    StorageBackend(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

// Conversion from sqlx errors
impl From<sqlx::Error> for StowageError {
    fn from(e: sqlx::Error) -> Self {
        StowageError::Database(e.to_string())
    }
}

/// Result type alias for Stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
