//! Transfer engine tests
//!
//! Ledger properties checked against the in-memory store through the public
//! handler API: conservation, atomic rollback and concurrent debits.

mod common;

use futures::TryStreamExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use audit_flow::audit::{AuditEventType, AuditQuery};
use audit_flow::domain::{TransactionStatus, TransactionType, User};
use audit_flow::handlers::{DepositCommand, DepositHandler, TransferCommand, TransferHandler};
use audit_flow::store::{FailPoint, LedgerStore, MemoryLedgerStore, StoreError, TransactionQuery};
use audit_flow::{AppError, ClientContext, DomainError};

use common::{balance_of, seed_user};

async fn transaction_count(store: &MemoryLedgerStore) -> usize {
    store
        .list_transactions(&TransactionQuery::recent(10_000))
        .await
        .expect("list transactions")
        .len()
}

async fn audit_count(store: &MemoryLedgerStore) -> usize {
    let entries: Vec<_> = store
        .query_audit(AuditQuery::new())
        .try_collect()
        .await
        .expect("query audit");
    entries.len()
}

fn transfer(sender: &User, recipient: &User, amount: &str) -> TransferCommand {
    TransferCommand::new(sender.id, recipient.recipient_id.as_str(), amount)
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn test_transfer_moves_funds_and_completes() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(500.00)).await;
    let bob = seed_user(&store, "Bob", dec!(0.00)).await;
    let handler = TransferHandler::new(store.clone());

    let transaction = assert_ok!(handler.execute(transfer(&alice, &bob, "150.00"), None).await);

    assert_eq!(transaction.status, TransactionStatus::Completed);
    assert_eq!(transaction.transaction_type, TransactionType::Transfer);
    assert_eq!(transaction.amount.value(), dec!(150.00));
    assert_eq!(transaction.from_user, Some(alice.id));
    assert_eq!(transaction.to_user, bob.id);
    assert!(transaction.hash_matches());

    assert_eq!(balance_of(&store, &alice).await, dec!(350.00));
    assert_eq!(balance_of(&store, &bob).await, dec!(150.00));

    let stored = store
        .find_transaction(&transaction.reference_id)
        .await
        .expect("find transaction")
        .expect("transaction persisted");
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_transfer_writes_one_row_and_two_audit_entries() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(100)).await;
    let bob = seed_user(&store, "Bob", dec!(0)).await;
    let handler = TransferHandler::new(store.clone());

    let context = ClientContext::new()
        .with_ip("198.51.100.4".parse().expect("ip"))
        .with_user_agent("engine-test");
    let transaction = assert_ok!(
        handler
            .execute(transfer(&alice, &bob, "25.50"), Some(&context))
            .await
    );

    assert_eq!(transaction_count(&store).await, 1);

    let entries: Vec<_> = store
        .query_audit(AuditQuery::new().transaction(transaction.id))
        .try_collect()
        .await
        .expect("query audit");
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| e.event_type() == AuditEventType::TransactionCompleted));
    assert!(entries.iter().all(|e| e.user_agent() == "engine-test"));

    let mut parties: Vec<_> = entries.iter().filter_map(|e| e.user_id()).collect();
    parties.sort();
    let mut expected = vec![alice.id, bob.id];
    expected.sort();
    assert_eq!(parties, expected);

    let sent = entries
        .iter()
        .find(|e| e.user_id() == Some(alice.id))
        .expect("sender entry");
    assert_eq!(sent.data().text("direction"), Some("sent"));
    assert_eq!(sent.data().text("reference_id"), Some(transaction.reference_id.as_str()));
}

// =========================================================================
// Rejections leave no trace
// =========================================================================

#[tokio::test]
async fn test_insufficient_balance_rejected_without_rows() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(50.00)).await;
    let bob = seed_user(&store, "Bob", dec!(0)).await;
    let handler = TransferHandler::new(store.clone());

    let err = assert_err!(handler.execute(transfer(&alice, &bob, "100.00"), None).await);

    match err {
        AppError::Domain(DomainError::InsufficientBalance { required, available }) => {
            assert_eq!(required, dec!(100.00));
            assert_eq!(available, dec!(50.00));
        }
        other => panic!("Expected InsufficientBalance, got {:?}", other),
    }
    assert_eq!(transaction_count(&store).await, 0);
    assert_eq!(audit_count(&store).await, 0);
    assert_eq!(balance_of(&store, &alice).await, dec!(50.00));
}

#[tokio::test]
async fn test_exact_balance_can_be_sent() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(42.42)).await;
    let bob = seed_user(&store, "Bob", dec!(0)).await;
    let handler = TransferHandler::new(store.clone());

    assert_ok!(handler.execute(transfer(&alice, &bob, "42.42"), None).await);

    assert_eq!(balance_of(&store, &alice).await, Decimal::ZERO);
    assert_eq!(balance_of(&store, &bob).await, dec!(42.42));
}

#[tokio::test]
async fn test_invalid_amounts_rejected_without_rows() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(100)).await;
    let bob = seed_user(&store, "Bob", dec!(0)).await;
    let handler = TransferHandler::new(store.clone());

    for raw in ["0", "0.00", "-5", "abc", "", "1.234", "1e2", "1E2"] {
        let err = assert_err!(handler.execute(transfer(&alice, &bob, raw), None).await);
        assert!(
            matches!(err, AppError::Domain(DomainError::InvalidTransaction(_))),
            "amount {:?} gave {:?}",
            raw,
            err
        );
    }

    let mut missing = transfer(&alice, &bob, "1");
    missing.amount = None;
    let err = assert_err!(handler.execute(missing, None).await);
    assert!(matches!(err, AppError::Domain(DomainError::InvalidTransaction(_))));

    assert_eq!(transaction_count(&store).await, 0);
    assert_eq!(audit_count(&store).await, 0);
    assert_eq!(balance_of(&store, &alice).await, dec!(100));
}

#[tokio::test]
async fn test_self_transfer_rejected() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(100)).await;
    let handler = TransferHandler::new(store.clone());

    let err = assert_err!(handler.execute(transfer(&alice, &alice, "10"), None).await);

    assert!(matches!(err, AppError::Domain(DomainError::InvalidTransaction(_))));
    assert_eq!(transaction_count(&store).await, 0);
    assert_eq!(balance_of(&store, &alice).await, dec!(100));
}

#[tokio::test]
async fn test_unknown_recipient_rejected() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(100)).await;
    let handler = TransferHandler::new(store.clone());

    let err = assert_err!(
        handler
            .execute(TransferCommand::new(alice.id, "ZZZZZZZZZZ", "10"), None)
            .await
    );

    assert!(matches!(err, AppError::Domain(DomainError::RecipientNotFound(_))));
    assert_eq!(transaction_count(&store).await, 0);
}

// =========================================================================
// Atomicity
// =========================================================================

#[tokio::test]
async fn test_storage_failure_at_any_step_rolls_back_everything() {
    let points = [
        FailPoint::InsertTransaction,
        FailPoint::SetBalance,
        FailPoint::UpdateStatus,
        FailPoint::InsertAudit,
        FailPoint::Commit,
    ];

    for point in points {
        let store = MemoryLedgerStore::new();
        let alice = seed_user(&store, "Alice", dec!(500)).await;
        let bob = seed_user(&store, "Bob", dec!(20)).await;
        let handler = TransferHandler::new(store.clone());

        store.inject_failure(point);
        let err = assert_err!(handler.execute(transfer(&alice, &bob, "150"), None).await);
        assert!(
            matches!(err, AppError::Storage(StoreError::Unavailable(_))),
            "{:?} gave {:?}",
            point,
            err
        );

        assert_eq!(balance_of(&store, &alice).await, dec!(500), "{:?}", point);
        assert_eq!(balance_of(&store, &bob).await, dec!(20), "{:?}", point);
        assert_eq!(transaction_count(&store).await, 0, "{:?}", point);
        assert_eq!(audit_count(&store).await, 0, "{:?}", point);

        // Fail points fire once; the retry goes through
        assert_ok!(handler.execute(transfer(&alice, &bob, "150"), None).await);
        assert_eq!(balance_of(&store, &alice).await, dec!(350));
        assert_eq!(audit_count(&store).await, 2);
    }
}

#[tokio::test]
async fn test_deposit_failure_rolls_back() {
    let store = MemoryLedgerStore::new();
    let bob = seed_user(&store, "Bob", dec!(10)).await;
    let handler = DepositHandler::new(store.clone());

    store.inject_failure(FailPoint::InsertAudit);
    let err = assert_err!(
        handler
            .execute(DepositCommand::new(bob.recipient_id.as_str(), "90"), None)
            .await
    );

    assert!(matches!(err, AppError::Storage(_)));
    assert_eq!(balance_of(&store, &bob).await, dec!(10));
    assert_eq!(transaction_count(&store).await, 0);
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_never_overdraw() {
    const TASKS: usize = 10;
    let amount = dec!(10.00);

    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", amount * Decimal::from(TASKS - 1)).await;
    let bob = seed_user(&store, "Bob", dec!(0)).await;
    let handler = TransferHandler::new(store.clone());

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let handler = handler.clone();
        let command = transfer(&alice, &bob, "10.00");
        handles.push(tokio::spawn(async move { handler.execute(command, None).await }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => succeeded += 1,
            Err(AppError::Domain(DomainError::InsufficientBalance { .. })) => insufficient += 1,
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, TASKS - 1);
    assert_eq!(insufficient, 1);
    assert_eq!(balance_of(&store, &alice).await, Decimal::ZERO);
    assert_eq!(balance_of(&store, &bob).await, amount * Decimal::from(TASKS - 1));
    assert_eq!(transaction_count(&store).await, TASKS - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crossing_transfers_conserve_total() {
    let store = MemoryLedgerStore::new();
    let alice = seed_user(&store, "Alice", dec!(100)).await;
    let bob = seed_user(&store, "Bob", dec!(100)).await;
    let handler = TransferHandler::new(store.clone());

    let mut handles = Vec::new();
    for i in 0..20 {
        let handler = handler.clone();
        let command = if i % 2 == 0 {
            transfer(&alice, &bob, "7.25")
        } else {
            transfer(&bob, &alice, "3.10")
        };
        handles.push(tokio::spawn(async move { handler.execute(command, None).await }));
    }

    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) | Err(AppError::Domain(DomainError::InsufficientBalance { .. })) => {}
            Err(other) => panic!("Unexpected error: {:?}", other),
        }
    }

    let alice_balance = balance_of(&store, &alice).await;
    let bob_balance = balance_of(&store, &bob).await;
    assert!(alice_balance >= Decimal::ZERO);
    assert!(bob_balance >= Decimal::ZERO);
    assert_eq!(alice_balance + bob_balance, dec!(200));
}
