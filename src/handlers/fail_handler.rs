//! Fail Transaction Handler
//!
//! Rejection path for collaborators: `pending -> failed`. No balance moves.

use crate::audit::{self, AuditData, AuditEventType, AuditRecord, Direction, TransactionSnapshot};
use crate::domain::{ClientContext, Transaction, TransactionStatus};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx};

use super::FailTransactionCommand;

/// Handler for failing pending transactions
#[derive(Debug, Clone)]
pub struct FailTransactionHandler<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> FailTransactionHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        command: FailTransactionCommand,
        context: Option<&ClientContext>,
    ) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let mut transaction = tx
            .lock_transaction(&command.reference_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", command.reference_id)))?;

        let next = transaction.status.transition_to(TransactionStatus::Failed)?;
        tx.update_transaction_status(transaction.id, transaction.status, next)
            .await?;
        transaction.status = next;

        // Same ascending-id order as transfers
        let (sender, recipient) = match transaction.from_user {
            Some(from) => {
                let (sender, recipient) = tx.lock_pair(from, transaction.to_user).await?;
                (Some(sender), recipient)
            }
            None => (None, tx.lock_user(transaction.to_user).await?),
        };

        let direction = if sender.is_some() {
            Direction::Sent
        } else {
            Direction::Deposit
        };
        let mut data: AuditData =
            TransactionSnapshot::capture(&transaction, sender.as_ref(), &recipient, direction)
                .into();
        data.insert("reason", command.reason.clone());

        let record = AuditRecord::new(
            AuditEventType::TransactionFailed,
            format!("Transaction {} failed: {}", transaction.reference_id, command.reason),
        )
        .user(sender.as_ref().map_or(recipient.id, |s| s.id))
        .transaction(transaction.id)
        .data(data);

        audit::record_in(&mut tx, record, context).await?;
        tx.commit().await?;

        tracing::warn!(
            reference_id = %transaction.reference_id,
            reason = %command.reason,
            "Transaction failed"
        );

        Ok(transaction)
    }
}
