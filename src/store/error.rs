//! Store Errors
//!
//! Error types for Ledger Store operations.

use crate::domain::TransactionStatus;

/// SQLSTATE raised by the `audit_logs` guard trigger
pub const SQLSTATE_AUDIT_IMMUTABLE: &str = "AF001";

/// SQLSTATE raised when a terminal transaction status is changed
pub const SQLSTATE_TERMINAL_STATUS: &str = "AF002";

const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";
const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Write rejected because the record is append-only or terminal
    #[error("Record is immutable: {0}")]
    ImmutableRecord(String),

    /// Compare-and-set on transaction status lost
    #[error("Transaction status is {found}, cannot move to {requested}")]
    StatusConflict {
        found: TransactionStatus,
        requested: TransactionStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique constraint hit
    #[error("Duplicate value for {0}")]
    Duplicate(String),

    /// Lock wait or statement timeout; the unit of work has been abandoned
    #[error("Timed out waiting for a lock")]
    LockTimeout,

    /// Row could not be mapped back into a domain value
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Backend refused the operation (used by the in-memory store's fail points)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Classify a SQLSTATE (plus constraint name) into a typed store error.
    pub fn from_sqlstate(code: &str, constraint: Option<&str>) -> Option<Self> {
        match code {
            SQLSTATE_AUDIT_IMMUTABLE => Some(Self::ImmutableRecord("audit_logs".to_string())),
            SQLSTATE_TERMINAL_STATUS => {
                Some(Self::ImmutableRecord("transactions.status".to_string()))
            }
            SQLSTATE_UNIQUE_VIOLATION => Some(Self::Duplicate(
                constraint.unwrap_or("unique constraint").to_string(),
            )),
            SQLSTATE_LOCK_NOT_AVAILABLE | SQLSTATE_QUERY_CANCELED => Some(Self::LockTimeout),
            _ => None,
        }
    }

    /// Whether a fresh unit of work could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockTimeout | StoreError::Duplicate(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                if let Some(mapped) = Self::from_sqlstate(&code, db_err.constraint()) {
                    return mapped;
                }
            }
        }
        StoreError::Database(err)
    }
}
