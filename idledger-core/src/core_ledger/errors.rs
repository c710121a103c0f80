//! Error types for ledger operations

use crate::core_identity::{CryptoError, DecodingError};
use rusqlite::ffi;
use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which storage constraint rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Primary key or UNIQUE index
    Unique,
    /// Foreign key reference to a missing parent
    ForeignKey,
    /// CHECK constraint
    Check,
    /// NOT NULL or anything else
    Other,
}

/// Errors that can occur in ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Source row of a copy or lookup does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage rejected the write
    #[error("Constraint violation ({kind:?}): {message}")]
    ConstraintViolation { kind: ConstraintKind, message: String },

    /// Stored or imported bytes could not be decoded
    #[error("Decoding error: {0}")]
    Decoding(#[from] DecodingError),

    /// Key generation or signing failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Caller broke an operation contract
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database busy or locked by another unit-of-work
    #[error("Database busy: {0}")]
    Busy(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// Whether re-running the whole unit-of-work may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConstraintViolation { kind: ConstraintKind::Unique, .. } | LedgerError::Busy(_)
        )
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) => {
                let message = msg.clone().unwrap_or_else(|| err.to_string());
                match err.code {
                    ffi::ErrorCode::ConstraintViolation => {
                        let kind = match err.extended_code {
                            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                                ConstraintKind::Unique
                            }
                            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
                            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
                            _ => ConstraintKind::Other,
                        };
                        LedgerError::ConstraintViolation { kind, message }
                    }
                    ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked => {
                        LedgerError::Busy(message)
                    }
                    _ => LedgerError::Storage(e.to_string()),
                }
            }
            rusqlite::Error::FromSqlConversionFailure(_, _, source) => {
                match source.downcast_ref::<DecodingError>() {
                    Some(decoding) => LedgerError::Decoding(decoding.clone()),
                    None => LedgerError::Decoding(DecodingError::Malformed(e.to_string())),
                }
            }
            rusqlite::Error::InvalidColumnType(..) => {
                LedgerError::Decoding(DecodingError::Malformed(e.to_string()))
            }
            _ => LedgerError::Storage(e.to_string()),
        }
    }
}

impl From<r2d2::Error> for LedgerError {
    fn from(e: r2d2::Error) -> Self {
        LedgerError::Storage(format!("Failed to get connection: {}", e))
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
