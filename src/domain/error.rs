//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::TransactionStatus;

/// Business rule violations and domain invariant failures.
///
/// These are independent of the storage and HTTP layers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed or non-positive amount, or a transfer to oneself
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Recipient identifier does not resolve to a user
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// Sender's balance does not cover the amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Attempted mutation of an append-only audit record
    #[error("Immutability violation: {0}")]
    ImmutabilityViolation(String),

    /// Status change that is not `pending -> completed | failed`
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Audit payload rejected at write time
    #[error("Invalid audit payload: {0}")]
    InvalidAuditPayload(String),
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance { required, available }
    }

    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::InvalidTransaction(msg.into())
    }

    /// Check if this is a client error (caller can correct it)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransaction(_)
                | Self::RecipientNotFound(_)
                | Self::InsufficientBalance { .. }
        )
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        Self::InvalidTransaction(err.to_string())
    }
}
