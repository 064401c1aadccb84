//! Transaction hash verification
//!
//! Every transaction row carries `sha256(reference_id)`. Recomputing it over
//! recent rows detects edits to either column.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::transaction_hash;
use crate::error::AppResult;
use crate::store::{LedgerStore, TransactionQuery};

/// Result of a hash verification pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub transactions_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid_transaction: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<String>,
}

impl IntegrityReport {
    fn valid(checked: u64) -> Self {
        Self {
            is_valid: true,
            transactions_checked: checked,
            first_invalid_transaction: None,
            expected_hash: None,
            actual_hash: None,
        }
    }
}

/// Recompute content hashes for the `limit` most recent transactions and
/// stop at the first mismatch.
pub async fn verify_transaction_hashes<S: LedgerStore>(
    store: &S,
    limit: i64,
) -> AppResult<IntegrityReport> {
    let transactions = store.list_transactions(&TransactionQuery::recent(limit)).await?;

    for (index, transaction) in transactions.iter().enumerate() {
        if !transaction.hash_matches() {
            tracing::warn!(
                transaction_id = %transaction.id,
                reference_id = %transaction.reference_id,
                "Transaction hash mismatch"
            );
            return Ok(IntegrityReport {
                is_valid: false,
                transactions_checked: index as u64 + 1,
                first_invalid_transaction: Some(transaction.id),
                expected_hash: Some(transaction_hash(&transaction.reference_id)),
                actual_hash: Some(transaction.transaction_hash.clone()),
            });
        }
    }

    Ok(IntegrityReport::valid(transactions.len() as u64))
}
