//! In-memory Ledger Store
//!
//! A single async mutex serialises units of work, so every unit sees a
//! consistent snapshot and concurrent transfers queue behind each other.
//! A unit works on a staged copy that replaces the live state on commit.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditQuery, NewAuditEntry, SortOrder};
use crate::domain::{Balance, NewUser, RecipientId, Transaction, TransactionStatus, User};

use super::{AuditSink, LedgerStore, LedgerTx, StoreError, StoreResult, TransactionQuery};

/// Where a simulated storage failure should fire. One-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    InsertTransaction,
    SetBalance,
    UpdateStatus,
    InsertAudit,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    transactions: Vec<Transaction>,
    audit: Vec<AuditLogEntry>,
}

/// Process-local ledger store
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    fail_point: Arc<StdMutex<Option<FailPoint>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation reaching `point` fail with `StoreError::Unavailable`.
    pub fn inject_failure(&self, point: FailPoint) {
        *self.fail_point.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    #[cfg(test)]
    pub(crate) async fn overwrite_transaction_hash(&self, reference_id: &str, hash: &str) {
        let mut state = self.state.lock().await;
        if let Some(t) = state.transactions.iter_mut().find(|t| t.reference_id == reference_id) {
            t.transaction_hash = hash.to_string();
        }
    }
}

/// Unit of work over the in-memory store
pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    fail_point: Arc<StdMutex<Option<FailPoint>>>,
}

impl MemoryLedgerTx {
    fn trip(&self, point: FailPoint) -> StoreResult<()> {
        let mut armed = self.fail_point.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(StoreError::Unavailable(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn staged_user(&self, id: Uuid) -> StoreResult<User> {
        self.staged
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }
}

#[async_trait]
impl AuditSink for MemoryLedgerTx {
    async fn insert_audit(&mut self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        self.trip(FailPoint::InsertAudit)?;
        if self.staged.audit.iter().any(|e| e.id() == entry.id) {
            return Err(StoreError::Duplicate("audit_logs_pkey".to_string()));
        }
        let sequence_number = self.staged.audit.len() as i64 + 1;
        let stored = AuditLogEntry::from_stored(entry, sequence_number);
        self.staged.audit.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_pair(&mut self, first: Uuid, second: Uuid) -> StoreResult<(User, User)> {
        // The whole store is already held by this unit.
        Ok((self.staged_user(first)?, self.staged_user(second)?))
    }

    async fn lock_user(&mut self, id: Uuid) -> StoreResult<User> {
        self.staged_user(id)
    }

    async fn lock_transaction(&mut self, reference_id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self
            .staged
            .transactions
            .iter()
            .find(|t| t.reference_id == reference_id)
            .cloned())
    }

    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        if self.staged.users.values().any(|u| u.recipient_id == user.recipient_id) {
            return Err(StoreError::Duplicate("users_recipient_id_key".to_string()));
        }
        if self.staged.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("users_email_key".to_string()));
        }
        let created = user.clone().into_user();
        self.staged.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        self.trip(FailPoint::InsertTransaction)?;
        if self
            .staged
            .transactions
            .iter()
            .any(|t| t.reference_id == transaction.reference_id)
        {
            return Err(StoreError::Duplicate("transactions_reference_id_key".to_string()));
        }
        self.staged.transactions.push(transaction.clone());
        Ok(())
    }

    async fn set_balance(&mut self, user_id: Uuid, balance: Balance) -> StoreResult<()> {
        self.trip(FailPoint::SetBalance)?;
        let user = self
            .staged
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.balance = balance;
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StoreResult<()> {
        self.trip(FailPoint::UpdateStatus)?;
        let row = self
            .staged
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction_id)))?;

        if row.status != from {
            return Err(StoreError::StatusConflict {
                found: row.status,
                requested: to,
            });
        }
        if row.status.transition_to(to).is_err() {
            return Err(StoreError::ImmutableRecord("transactions.status".to_string()));
        }
        row.status = to;
        Ok(())
    }

    async fn commit(mut self) -> StoreResult<()> {
        self.trip(FailPoint::Commit)?;
        *self.guard = self.staged;
        Ok(())
    }
}

fn sort_entries(entries: &mut [AuditLogEntry], order: SortOrder) {
    entries.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then(a.sequence_number().cmp(&b.sequence_number()))
    });
    if order == SortOrder::NewestFirst {
        entries.reverse();
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> StoreResult<MemoryLedgerTx> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryLedgerTx {
            guard,
            staged,
            fail_point: self.fail_point.clone(),
        })
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_recipient_id(
        &self,
        recipient_id: &RecipientId,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| &u.recipient_id == recipient_id)
            .cloned())
    }

    async fn find_transaction(&self, reference_id: &str) -> StoreResult<Option<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.reference_id == reference_id)
            .cloned())
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> StoreResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| query.party.map_or(true, |p| t.involves(p)))
            .cloned()
            .collect();
        // Insertion order breaks created_at ties
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn find_audit_entry(&self, id: Uuid) -> StoreResult<Option<AuditLogEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .audit
            .iter()
            .find(|e| e.id() == id)
            .cloned())
    }

    fn query_audit(&self, query: AuditQuery) -> BoxStream<'_, StoreResult<AuditLogEntry>> {
        let state = self.state.clone();
        stream::once(async move {
            let mut entries: Vec<AuditLogEntry> = state
                .lock()
                .await
                .audit
                .iter()
                .filter(|e| query.matches(e))
                .cloned()
                .collect();
            sort_entries(&mut entries, query.order);
            stream::iter(entries.into_iter().map(Ok))
        })
        .flatten()
        .boxed()
    }
}
