//! Deposit Handler
//!
//! Credits an account from outside the ledger (no sender). A deposit either
//! completes immediately or is held `pending` until settled or failed.

use crate::audit::{self, AuditEventType, AuditRecord, Direction, TransactionSnapshot};
use crate::domain::{
    Amount, ClientContext, DomainError, Transaction, TransactionStatus, TransactionType, User,
};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx};

use super::{resolve_recipient, DepositCommand};

/// Handler for deposits
#[derive(Debug, Clone)]
pub struct DepositHandler<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> DepositHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Execute the deposit command
    pub async fn execute(
        &self,
        command: DepositCommand,
        context: Option<&ClientContext>,
    ) -> AppResult<Transaction> {
        let amount = Amount::parse_input(command.amount.as_deref())?;
        let recipient = resolve_recipient(&self.store, &command.recipient_id).await?;

        let mut tx = self.store.begin().await?;
        let recipient = tx.lock_user(recipient.id).await?;

        let mut transaction = Transaction::pending(
            None,
            &recipient,
            amount,
            TransactionType::Deposit,
            command.description.unwrap_or_default(),
        );
        tx.insert_transaction(&transaction).await?;

        let record = if command.hold {
            AuditRecord::new(
                AuditEventType::TransactionCreated,
                format!("Deposit of {} pending", amount),
            )
            .user(recipient.id)
            .transaction(transaction.id)
            .data(TransactionSnapshot::capture(&transaction, None, &recipient, Direction::Deposit))
        } else {
            tx.set_balance(recipient.id, recipient.balance.credit(&amount)?).await?;
            transaction.status = transaction.status.transition_to(TransactionStatus::Completed)?;
            tx.update_transaction_status(
                transaction.id,
                TransactionStatus::Pending,
                transaction.status,
            )
            .await?;
            completed_record(&transaction, &recipient)
        };

        audit::record_in(&mut tx, record, context).await?;
        tx.commit().await?;

        tracing::info!(
            reference_id = %transaction.reference_id,
            recipient = %recipient.recipient_id,
            amount = %amount,
            status = %transaction.status,
            "Deposit recorded"
        );

        Ok(transaction)
    }

    /// Complete a held deposit and credit the recipient.
    pub async fn settle(
        &self,
        reference_id: &str,
        context: Option<&ClientContext>,
    ) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let mut transaction = tx
            .lock_transaction(reference_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", reference_id)))?;

        if transaction.transaction_type != TransactionType::Deposit {
            return Err(DomainError::invalid_transaction("Only deposits can be settled").into());
        }

        let next = transaction.status.transition_to(TransactionStatus::Completed)?;
        let recipient = tx.lock_user(transaction.to_user).await?;

        tx.set_balance(recipient.id, recipient.balance.credit(&transaction.amount)?)
            .await?;
        tx.update_transaction_status(transaction.id, transaction.status, next)
            .await?;
        transaction.status = next;

        audit::record_in(&mut tx, completed_record(&transaction, &recipient), context).await?;
        tx.commit().await?;

        tracing::info!(
            reference_id = %transaction.reference_id,
            amount = %transaction.amount,
            "Held deposit settled"
        );

        Ok(transaction)
    }
}

fn completed_record(transaction: &Transaction, recipient: &User) -> AuditRecord {
    AuditRecord::new(
        AuditEventType::TransactionCompleted,
        format!("Deposit of {} received", transaction.amount),
    )
    .user(recipient.id)
    .transaction(transaction.id)
    .data(TransactionSnapshot::capture(transaction, None, recipient, Direction::Deposit))
}
