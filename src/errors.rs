//! # Data-Access Errors
//!
//! Error taxonomy shared by every compiler and by the unit-of-work.
//! Compilers only ever produce `InvalidParameter`; validation hooks produce
//! `ValidationFailed`; the store produces `Storage` wrapped with the table
//! and row count of the statement that failed.

use thiserror::Error;

/// Result type for data-access operations
pub type DalResult<T> = Result<T, DalError>;

/// Data-access errors
#[derive(Debug, Error)]
pub enum DalError {
    // ==================
    // Caller Errors
    // ==================
    /// Malformed expression, disallowed field, missing option, page limit exceeded
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Update or delete matched zero rows
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// A record validation hook rejected the payload
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The caller supplied deadline passed before the work finished
    #[error("deadline exceeded")]
    DeadlineExceeded,

    // ==================
    // Store Errors
    // ==================
    /// The underlying store rejected a statement
    #[error("storage error on table {table} ({rows} rows): {source}")]
    Storage {
        table: String,
        rows: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// Invariant broken inside the engine itself
    #[error("internal error: {0}")]
    Internal(String),
}

impl DalError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a record not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::RecordNotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a store error with the statement's table and row count
    pub fn storage(table: impl Into<String>, rows: usize, source: rusqlite::Error) -> Self {
        Self::Storage {
            table: table.into(),
            rows,
            source,
        }
    }

    /// Stable error code for collaborators
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by caller input rather than the store
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_) | Self::RecordNotFound(_) | Self::ValidationFailed(_)
        )
    }
}

impl From<serde_json::Error> for DalError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParameter(e.to_string())
    }
}

impl From<rusqlite::Error> for DalError {
    /// Store error raised outside any statement, e.g. while opening
    fn from(e: rusqlite::Error) -> Self {
        Self::storage("connection", 0, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DalError::invalid_parameter("x").code(), "INVALID_PARAMETER");
        assert_eq!(DalError::not_found("x").code(), "RECORD_NOT_FOUND");
        assert_eq!(DalError::validation("x").code(), "VALIDATION_FAILED");
        assert_eq!(DalError::DeadlineExceeded.code(), "DEADLINE_EXCEEDED");
        assert_eq!(
            DalError::storage("subnet", 3, rusqlite::Error::QueryReturnedNoRows).code(),
            "STORAGE_ERROR"
        );
    }

    #[test]
    fn test_storage_error_carries_context() {
        let err = DalError::storage("subnet", 3, rusqlite::Error::QueryReturnedNoRows);
        let msg = err.to_string();
        assert!(msg.contains("subnet"));
        assert!(msg.contains("3 rows"));
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_json_error_is_invalid_parameter() {
        let err: DalError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, DalError::InvalidParameter(_)));
    }

    #[test]
    fn test_store_error_converts() {
        let err: DalError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(
            matches!(err, DalError::Storage { ref table, rows: 0, .. } if table == "connection")
        );
        assert!(!err.is_caller_error());
    }
}
