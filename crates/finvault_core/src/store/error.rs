//! Record store error taxonomy.
//!
//! # Invariants
//! - Every store failure is one of the `ErrorKind` variants; raw SQLite errors
//!   never leave the store unclassified.
//! - Only `TransactionTimeout` and `TransactionAborted` are retryable.

use crate::db::DbError;
use crate::store::entity::{RecordId, RecordValidationError};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type StoreResult<T> = Result<T, StoreError>;

/// Stable classification of store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    TransactionTimeout,
    TransactionAborted,
    Storage,
    Validation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::TransactionTimeout => "transaction_timeout",
            Self::TransactionAborted => "transaction_aborted",
            Self::Storage => "storage",
            Self::Validation => "validation",
        }
    }
}

/// Error returned by record store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Id does not resolve to a live record (or to any record, for `restore`).
    NotFound(RecordId),
    /// Unique, primary-key, foreign-key or check constraint violated.
    Conflict(rusqlite::Error),
    /// An attempt ran past its deadline and retries were exhausted.
    TransactionTimeout { timeout: Duration },
    /// SQLite reported lock contention and retries were exhausted.
    TransactionAborted(rusqlite::Error),
    /// Any other storage failure.
    Storage(DbError),
    /// Entity failed its business rules.
    Validation(RecordValidationError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::TransactionTimeout { .. } => ErrorKind::TransactionTimeout,
            Self::TransactionAborted(_) => ErrorKind::TransactionAborted,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Returns whether a fresh transaction attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransactionTimeout | ErrorKind::TransactionAborted
        )
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::Conflict(err) => write!(f, "constraint violation: {err}"),
            Self::TransactionTimeout { timeout } => write!(
                f,
                "transaction timed out after {} ms",
                timeout.as_millis()
            ),
            Self::TransactionAborted(err) => write!(f, "transaction was rolled back: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::Conflict(err) => Some(err),
            Self::TransactionTimeout { .. } => None,
            Self::TransactionAborted(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Validation(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match sqlite_error_code(&value) {
            Some(ErrorCode::ConstraintViolation) => Self::Conflict(value),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::TransactionAborted(value)
            }
            _ => Self::Storage(DbError::Sqlite(value)),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Storage(other),
        }
    }
}

impl From<RecordValidationError> for StoreError {
    fn from(value: RecordValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Returns the primary SQLite result code carried by `err`, if any.
pub(crate) fn sqlite_error_code(err: &rusqlite::Error) -> Option<ErrorCode> {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, StoreError};
    use crate::db::DbError;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_retryable_aborts() {
        for code in [ffi::SQLITE_BUSY, ffi::SQLITE_LOCKED] {
            let err = StoreError::from(sqlite_failure(code));
            assert_eq!(err.kind(), ErrorKind::TransactionAborted);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn constraint_violations_are_conflicts() {
        let err = StoreError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_retryable());

        let err = StoreError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn other_failures_are_storage_errors() {
        let err = StoreError::from(sqlite_failure(ffi::SQLITE_IOERR));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_retryable());

        let err = StoreError::from(DbError::InvalidData("bad uuid".to_string()));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.to_string().contains("bad uuid"));
    }

    #[test]
    fn wrapped_sqlite_errors_are_reclassified() {
        let err = StoreError::from(DbError::Sqlite(sqlite_failure(ffi::SQLITE_BUSY)));
        assert_eq!(err.kind(), ErrorKind::TransactionAborted);
    }
}
