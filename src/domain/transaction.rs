//! Transaction record
//!
//! One row per transfer attempt (or non-transfer credit). Status only ever
//! moves forward: `pending -> completed | failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, DomainError, RecipientId, User};

/// Kind of ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "transfer",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(TransactionType::Transfer),
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Validate a status change. Only `pending` may move, and only forward.
    pub fn transition_to(self, next: TransactionStatus) -> Result<TransactionStatus, DomainError> {
        match (self, next) {
            (TransactionStatus::Pending, TransactionStatus::Completed)
            | (TransactionStatus::Pending, TransactionStatus::Failed) => Ok(next),
            (from, to) => Err(DomainError::InvalidStatusTransition { from, to }),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// Lowercase hex SHA-256 of a reference id (64 chars).
pub fn transaction_hash(reference_id: &str) -> String {
    hex::encode(Sha256::digest(reference_id.as_bytes()))
}

/// Persisted transaction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference_id: String,
    pub transaction_hash: String,
    pub from_user: Option<Uuid>,
    pub from_recipient_id: Option<RecipientId>,
    pub to_user: Uuid,
    pub to_recipient_id: RecipientId,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a fresh `pending` transaction with a new reference id and hash.
    pub fn pending(
        from: Option<&User>,
        to: &User,
        amount: Amount,
        transaction_type: TransactionType,
        description: impl Into<String>,
    ) -> Self {
        let reference_id = Uuid::new_v4().to_string();
        Self {
            id: Uuid::new_v4(),
            transaction_hash: transaction_hash(&reference_id),
            reference_id,
            from_user: from.map(|u| u.id),
            from_recipient_id: from.map(|u| u.recipient_id.clone()),
            to_user: to.id,
            to_recipient_id: to.recipient_id.clone(),
            amount,
            transaction_type,
            status: TransactionStatus::Pending,
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether the stored hash still matches the reference id.
    pub fn hash_matches(&self) -> bool {
        self.transaction_hash == transaction_hash(&self.reference_id)
    }

    /// Whether the given user is sender or recipient.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.to_user == user_id || self.from_user == Some(user_id)
    }
}
