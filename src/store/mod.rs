//! Ledger Store module
//!
//! Persistence port for users, transactions and the audit trail, with a
//! PostgreSQL adapter and an in-memory adapter.
//!
//! Writes only happen through a [`LedgerTx`] (one atomic unit of work). The
//! audit trail exposes insert and query, nothing else.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::audit::{AuditLogEntry, AuditQuery, NewAuditEntry};
use crate::domain::{Balance, NewUser, RecipientId, Transaction, TransactionStatus, User};

pub use error::{StoreError, SQLSTATE_AUDIT_IMMUTABLE, SQLSTATE_TERMINAL_STATUS};
pub use memory::{FailPoint, MemoryLedgerStore};
pub use postgres::PgLedgerStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for listing transactions, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionQuery {
    /// Only rows where this user is sender or recipient
    pub party: Option<Uuid>,
    pub limit: i64,
}

impl TransactionQuery {
    pub fn recent(limit: i64) -> Self {
        Self { party: None, limit }
    }

    pub fn for_user(user_id: Uuid, limit: i64) -> Self {
        Self {
            party: Some(user_id),
            limit,
        }
    }
}

/// Append-only audit writer. The only audit write operation in the crate.
#[async_trait]
pub trait AuditSink: Send {
    async fn insert_audit(&mut self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry>;
}

/// One atomic unit of work. Dropping it without `commit` rolls everything back.
#[async_trait]
pub trait LedgerTx: AuditSink + Send + Sized {
    /// Lock two users for the rest of the unit. Locks are taken in ascending
    /// id order; the result is returned in argument order.
    async fn lock_pair(&mut self, first: Uuid, second: Uuid) -> StoreResult<(User, User)>;

    /// Lock a single user for the rest of the unit
    async fn lock_user(&mut self, id: Uuid) -> StoreResult<User>;

    /// Lock a transaction row by reference id
    async fn lock_transaction(&mut self, reference_id: &str) -> StoreResult<Option<Transaction>>;

    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    async fn set_balance(&mut self, user_id: Uuid, balance: Balance) -> StoreResult<()>;

    /// Compare-and-set the status: fails with `StatusConflict` unless the
    /// current status equals `from`.
    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;
}

/// Read side of the ledger plus the unit-of-work factory.
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    type Tx: LedgerTx;

    async fn begin(&self) -> StoreResult<Self::Tx>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_user_by_recipient_id(
        &self,
        recipient_id: &RecipientId,
    ) -> StoreResult<Option<User>>;

    async fn find_transaction(&self, reference_id: &str) -> StoreResult<Option<Transaction>>;

    async fn list_transactions(&self, query: &TransactionQuery) -> StoreResult<Vec<Transaction>>;

    async fn find_audit_entry(&self, id: Uuid) -> StoreResult<Option<AuditLogEntry>>;

    /// Lazily stream audit entries matching the query, in `query.order`.
    fn query_audit(&self, query: AuditQuery) -> BoxStream<'_, StoreResult<AuditLogEntry>>;
}
