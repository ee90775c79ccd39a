//! Error types for StrataDB
//!
//! Provides a unified error type for all operations. `NotFound` is not an
//! error: lookups return `Ok(None)` for missing or deleted keys.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataDB operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    CorruptLog(String),

    #[error("SSTable corruption detected: {0}")]
    CorruptTable(String),

    #[error("Manifest corruption detected: {0}")]
    CorruptManifest(String),

    // -------------------------------------------------------------------------
    // Programming Errors
    // -------------------------------------------------------------------------
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key already exists: {0}")]
    KeyExists(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Background Work
    // -------------------------------------------------------------------------
    #[error("Background work failed: {0}")]
    Background(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

/// Coarse error classification, stable across error messages.
///
/// This is what the binding layer reports alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    CorruptLog,
    CorruptTable,
    CorruptManifest,
    InvariantViolation,
    InvalidArgument,
    KeyExists,
    Cancelled,
    ShuttingDown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::CorruptLog => "corrupt_log",
            ErrorKind::CorruptTable => "corrupt_table",
            ErrorKind::CorruptManifest => "corrupt_manifest",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::KeyExists => "key_exists",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StrataError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Io(_) | StrataError::Background(_) => ErrorKind::Io,
            StrataError::CorruptLog(_) => ErrorKind::CorruptLog,
            StrataError::CorruptTable(_) => ErrorKind::CorruptTable,
            StrataError::CorruptManifest(_) => ErrorKind::CorruptManifest,
            StrataError::InvariantViolation(_) | StrataError::Serialization(_) => {
                ErrorKind::InvariantViolation
            }
            StrataError::InvalidArgument(_) | StrataError::Config(_) => ErrorKind::InvalidArgument,
            StrataError::KeyExists(_) => ErrorKind::KeyExists,
            StrataError::Cancelled(_) => ErrorKind::Cancelled,
            StrataError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Whether a background job may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io)
    }
}
