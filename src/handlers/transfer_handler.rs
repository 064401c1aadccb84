//! Transfer Handler
//!
//! Moves funds between two users. Validation runs in a fixed order and the
//! first failing check wins:
//!
//! 1. amount present and a positive decimal with at most 2 places
//! 2. recipient id resolves to a user
//! 3. sender and recipient differ
//! 4. sender's locked balance covers the amount
//!
//! Everything from the balance check onwards (transaction row, both balance
//! updates, the status flip and both audit entries) is one unit of work.

use crate::audit::{self, AuditEventType, AuditRecord, Direction, TransactionSnapshot};
use crate::domain::{
    Amount, ClientContext, DomainError, Transaction, TransactionStatus, TransactionType, User,
};
use crate::error::AppResult;
use crate::store::{LedgerStore, LedgerTx};

use super::{resolve_recipient, TransferCommand};

// =========================================================================
// TransferHandler
// =========================================================================

/// Handler for user-to-user transfers
#[derive(Debug, Clone)]
pub struct TransferHandler<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> TransferHandler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Execute the transfer command
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: Option<&ClientContext>,
    ) -> AppResult<Transaction> {
        let amount = Amount::parse_input(command.amount.as_deref())?;

        let recipient = resolve_recipient(&self.store, &command.recipient_id).await?;

        if recipient.id == command.sender_id {
            return Err(DomainError::invalid_transaction("Cannot transfer to self").into());
        }

        let mut tx = self.store.begin().await?;

        // Balances below come from the locked rows only
        let (sender, recipient) = tx.lock_pair(command.sender_id, recipient.id).await?;

        if !sender.balance.is_sufficient_for(&amount) {
            tracing::debug!(
                sender = %sender.id,
                amount = %amount,
                available = %sender.balance,
                "Transfer rejected: insufficient balance"
            );
            return Err(
                DomainError::insufficient_balance(amount.value(), sender.balance.value()).into(),
            );
        }

        let mut transaction = Transaction::pending(
            Some(&sender),
            &recipient,
            amount,
            TransactionType::Transfer,
            command.description.unwrap_or_default(),
        );
        tx.insert_transaction(&transaction).await?;

        tx.set_balance(sender.id, sender.balance.debit(&amount)?).await?;
        tx.set_balance(recipient.id, recipient.balance.credit(&amount)?).await?;

        transaction.status = transaction.status.transition_to(TransactionStatus::Completed)?;
        tx.update_transaction_status(transaction.id, TransactionStatus::Pending, transaction.status)
            .await?;

        for (party, direction) in [(&sender, Direction::Sent), (&recipient, Direction::Received)] {
            let record = transfer_record(&transaction, &sender, &recipient, party, direction);
            audit::record_in(&mut tx, record, context).await?;
        }

        tx.commit().await?;

        tracing::info!(
            reference_id = %transaction.reference_id,
            sender = %sender.recipient_id,
            recipient = %recipient.recipient_id,
            amount = %amount,
            "Transfer completed"
        );

        Ok(transaction)
    }
}

fn transfer_record(
    transaction: &Transaction,
    sender: &User,
    recipient: &User,
    party: &User,
    direction: Direction,
) -> AuditRecord {
    let description = match direction {
        Direction::Sent => format!("Sent {} to {}", transaction.amount, recipient.display_name),
        _ => format!("Received {} from {}", transaction.amount, sender.display_name),
    };

    AuditRecord::new(AuditEventType::TransactionCompleted, description)
        .user(party.id)
        .transaction(transaction.id)
        .data(TransactionSnapshot::capture(transaction, Some(sender), recipient, direction))
}
