//! Handler tests
//!
//! Run against the in-memory store.

#[cfg(test)]
mod tests {
    use crate::audit::{AuditEventType, AuditQuery};
    use crate::domain::{
        Amount, Balance, ClientContext, DomainError, NewUser, Transaction, TransactionStatus,
        TransactionType, User,
    };
    use crate::error::AppError;
    use crate::handlers::{
        DepositCommand, DepositHandler, FailTransactionCommand, FailTransactionHandler,
        OpenAccountCommand, OpenAccountHandler, TransferCommand, TransferHandler,
    };
    use crate::store::{LedgerStore, LedgerTx, MemoryLedgerStore, TransactionQuery};
    use futures::TryStreamExt;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn seed(store: &MemoryLedgerStore, name: &str, balance: Decimal) -> User {
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(&NewUser::new(
                format!("{}@example.com", name.to_lowercase()),
                name,
                Balance::new(balance).unwrap(),
            ))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        user
    }

    async fn balance_of(store: &MemoryLedgerStore, user: &User) -> Decimal {
        store.find_user(user.id).await.unwrap().unwrap().balance.value()
    }

    async fn transaction_count(store: &MemoryLedgerStore) -> usize {
        store.list_transactions(&TransactionQuery::recent(1000)).await.unwrap().len()
    }

    // =========================================================================
    // Transfer validation order
    // =========================================================================

    #[tokio::test]
    async fn test_missing_amount_checked_before_recipient() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(100)).await;
        let handler = TransferHandler::new(store.clone());

        let mut command = TransferCommand::new(alice.id, "0000000000", "1");
        command.amount = None;

        let err = handler.execute(command, None).await.unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidTransaction(_))));
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(100)).await;
        let handler = TransferHandler::new(store.clone());

        for raw in ["9999999999", "not-a-number", ""] {
            let err = handler
                .execute(TransferCommand::new(alice.id, raw, "10"), None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, AppError::Domain(DomainError::RecipientNotFound(_))),
                "{:?} for {:?}",
                err,
                raw
            );
        }
        assert_eq!(transaction_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_self_transfer_checked_before_balance() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(1)).await;
        let handler = TransferHandler::new(store.clone());

        // Amount exceeds the balance too, but self-transfer wins
        let err = handler
            .execute(TransferCommand::new(alice.id, alice.recipient_id.as_str(), "500"), None)
            .await
            .unwrap_err();

        match err {
            AppError::Domain(DomainError::InvalidTransaction(msg)) => {
                assert!(msg.contains("Cannot transfer to self"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transfer_records_description_and_context() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(100)).await;
        let bob = seed(&store, "Bob", dec!(0)).await;
        let handler = TransferHandler::new(store.clone());
        let context = ClientContext::new()
            .with_ip("198.51.100.4".parse().unwrap())
            .with_user_agent("ledger-test");

        let t = handler
            .execute(
                TransferCommand::new(alice.id, bob.recipient_id.as_str(), "12.5")
                    .with_description("lunch"),
                Some(&context),
            )
            .await
            .unwrap();

        assert_eq!(t.description, "lunch");
        assert_eq!(t.amount.to_string(), "12.50");
        assert_eq!(t.from_recipient_id.as_ref(), Some(&alice.recipient_id));

        let entries: Vec<_> = store
            .query_audit(AuditQuery::new().transaction(t.id))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.user_agent(), "ledger-test");
            assert_eq!(entry.ip_address(), context.ip_address);
        }

        let sent = entries.iter().find(|e| e.user_id() == Some(alice.id)).unwrap();
        assert_eq!(sent.description(), "Sent 12.50 to Bob");
        assert_eq!(sent.data().text("direction"), Some("sent"));
        assert_eq!(sent.data().text("recipient_name"), Some("Bob"));

        let received = entries.iter().find(|e| e.user_id() == Some(bob.id)).unwrap();
        assert_eq!(received.description(), "Received 12.50 from Alice");
        assert_eq!(received.data().text("direction"), Some("received"));
        assert_eq!(received.data().text("status"), Some("completed"));
    }

    // =========================================================================
    // Deposits
    // =========================================================================

    #[tokio::test]
    async fn test_deposit_credits_without_sender() {
        let store = MemoryLedgerStore::new();
        let bob = seed(&store, "Bob", dec!(10)).await;
        let handler = DepositHandler::new(store.clone());

        let t = handler
            .execute(DepositCommand::new(bob.recipient_id.as_str(), "40"), None)
            .await
            .unwrap();

        assert_eq!(t.transaction_type, TransactionType::Deposit);
        assert_eq!(t.status, TransactionStatus::Completed);
        assert!(t.from_user.is_none());
        assert_eq!(balance_of(&store, &bob).await, dec!(50.00));

        let entries: Vec<_> = store
            .query_audit(AuditQuery::new().transaction(t.id))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), AuditEventType::TransactionCompleted);
        assert_eq!(entries[0].data().text("direction"), Some("deposit"));
    }

    #[tokio::test]
    async fn test_deposit_rejects_bad_amount() {
        let store = MemoryLedgerStore::new();
        let bob = seed(&store, "Bob", dec!(10)).await;
        let handler = DepositHandler::new(store.clone());

        let err = handler
            .execute(DepositCommand::new(bob.recipient_id.as_str(), "-3"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidTransaction(_))));
        assert_eq!(transaction_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_held_deposit_settles_once() {
        let store = MemoryLedgerStore::new();
        let bob = seed(&store, "Bob", dec!(0)).await;
        let handler = DepositHandler::new(store.clone());

        let held = handler
            .execute(DepositCommand::new(bob.recipient_id.as_str(), "25").held(), None)
            .await
            .unwrap();
        assert_eq!(held.status, TransactionStatus::Pending);
        assert_eq!(balance_of(&store, &bob).await, dec!(0));

        let settled = handler.settle(&held.reference_id, None).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(balance_of(&store, &bob).await, dec!(25));

        let err = handler.settle(&held.reference_id, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStatusTransition {
                from: TransactionStatus::Completed,
                to: TransactionStatus::Completed
            })
        ));
        assert_eq!(balance_of(&store, &bob).await, dec!(25));

        let events: Vec<AuditEventType> = store
            .query_audit(AuditQuery::new().transaction(held.id))
            .map_ok(|e| e.event_type())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            events,
            vec![AuditEventType::TransactionCompleted, AuditEventType::TransactionCreated]
        );
    }

    // =========================================================================
    // Failing transactions
    // =========================================================================

    #[tokio::test]
    async fn test_fail_pending_deposit() {
        let store = MemoryLedgerStore::new();
        let bob = seed(&store, "Bob", dec!(0)).await;
        let held = DepositHandler::new(store.clone())
            .execute(DepositCommand::new(bob.recipient_id.as_str(), "25").held(), None)
            .await
            .unwrap();

        let handler = FailTransactionHandler::new(store.clone());
        let failed = handler
            .execute(FailTransactionCommand::new(&held.reference_id, "card declined"), None)
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(balance_of(&store, &bob).await, dec!(0));

        let entries: Vec<_> = store
            .query_audit(AuditQuery::new().event_type(AuditEventType::TransactionFailed))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data().text("reason"), Some("card declined"));

        // failed is terminal
        let err = DepositHandler::new(store.clone())
            .settle(&held.reference_id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStatusTransition {
                from: TransactionStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fail_pending_transfer_records_sender() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(100)).await;
        let bob = seed(&store, "Bob", dec!(0)).await;

        let pending = Transaction::pending(
            Some(&alice),
            &bob,
            Amount::new(dec!(40)).unwrap(),
            TransactionType::Transfer,
            "",
        );
        let mut tx = store.begin().await.unwrap();
        tx.insert_transaction(&pending).await.unwrap();
        tx.commit().await.unwrap();

        let failed = FailTransactionHandler::new(store.clone())
            .execute(FailTransactionCommand::new(&pending.reference_id, "fraud check"), None)
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(balance_of(&store, &alice).await, dec!(100));
        assert_eq!(balance_of(&store, &bob).await, dec!(0));

        let entries: Vec<_> = store
            .query_audit(AuditQuery::new().transaction(pending.id))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), AuditEventType::TransactionFailed);
        assert_eq!(entries[0].user_id(), Some(alice.id));
        assert_eq!(entries[0].data().text("direction"), Some("sent"));
        assert_eq!(entries[0].data().text("sender_name"), Some("Alice"));
        assert_eq!(entries[0].data().text("recipient_name"), Some("Bob"));
    }

    #[tokio::test]
    async fn test_completed_transfer_cannot_fail() {
        let store = MemoryLedgerStore::new();
        let alice = seed(&store, "Alice", dec!(100)).await;
        let bob = seed(&store, "Bob", dec!(0)).await;
        let t = TransferHandler::new(store.clone())
            .execute(TransferCommand::new(alice.id, bob.recipient_id.as_str(), "10"), None)
            .await
            .unwrap();

        let err = FailTransactionHandler::new(store.clone())
            .execute(FailTransactionCommand::new(&t.reference_id, "too late"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStatusTransition {
                from: TransactionStatus::Completed,
                to: TransactionStatus::Failed
            })
        ));

        let stored = store.find_transaction(&t.reference_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_fail_unknown_reference() {
        let store = MemoryLedgerStore::new();
        let err = FailTransactionHandler::new(store)
            .execute(FailTransactionCommand::new("missing", "n/a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    // =========================================================================
    // Opening accounts
    // =========================================================================

    #[tokio::test]
    async fn test_open_account_with_starting_balance() {
        let store = MemoryLedgerStore::new();
        let handler = OpenAccountHandler::new(store.clone(), Balance::new(dec!(500)).unwrap());

        let user = handler
            .execute(OpenAccountCommand::new(" Carol@Example.com ", "Carol"), None)
            .await
            .unwrap();

        assert_eq!(user.email, "carol@example.com");
        assert_eq!(user.balance.value(), dec!(500.00));
        assert_eq!(user.recipient_id.as_str().len(), 10);
        assert!(!user.is_staff);

        let entries: Vec<_> = store
            .query_audit(AuditQuery::new().user(user.id))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), AuditEventType::AccountCreated);
        assert_eq!(entries[0].data().text("recipient_id"), Some(user.recipient_id.as_str()));
    }

    #[tokio::test]
    async fn test_open_account_rejects_duplicate_email() {
        let store = MemoryLedgerStore::new();
        let handler = OpenAccountHandler::new(store.clone(), Balance::zero());

        handler
            .execute(OpenAccountCommand::new("dave@example.com", "Dave"), None)
            .await
            .unwrap();
        let err = handler
            .execute(OpenAccountCommand::new("DAVE@example.com", "Dave again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_open_account_validates_input() {
        let handler = OpenAccountHandler::new(MemoryLedgerStore::new(), Balance::zero());

        let err = handler
            .execute(OpenAccountCommand::new("not-an-email", "Eve"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));

        let err = handler
            .execute(OpenAccountCommand::new("eve@example.com", "   "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
