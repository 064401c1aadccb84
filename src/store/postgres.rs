//! PostgreSQL Ledger Store
//!
//! Users, transactions and the audit trail in one database. A unit of work is
//! a single database transaction; user rows are locked with `FOR UPDATE`.
//! Immutability of `audit_logs` and of terminal transaction statuses is also
//! enforced by triggers (see `sql/schema.sql`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction as PgTransaction};
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::{AuditData, AuditLogEntry, AuditQuery, NewAuditEntry, SortOrder};
use crate::domain::{Amount, Balance, NewUser, RecipientId, Transaction, TransactionStatus, User};

use super::{AuditSink, LedgerStore, LedgerTx, StoreError, StoreResult, TransactionQuery};

type UserRow = (Uuid, String, String, String, Decimal, bool, DateTime<Utc>);

type TransactionRow = (
    Uuid,
    String,
    String,
    Option<Uuid>,
    Option<String>,
    Uuid,
    String,
    Decimal,
    String,
    String,
    String,
    DateTime<Utc>,
);

type AuditRow = (
    Uuid,
    i64,
    String,
    Option<Uuid>,
    Option<Uuid>,
    String,
    serde_json::Value,
    Option<String>,
    String,
    DateTime<Utc>,
);

const USER_COLUMNS: &str =
    "id, email, display_name, recipient_id, balance, is_staff, created_at";

const TRANSACTION_COLUMNS: &str =
    "id, reference_id, transaction_hash, from_user, from_recipient_id, \
     to_user, to_recipient_id, amount, transaction_type, status, description, created_at";

const AUDIT_SELECT_NEWEST: &str = r#"
    SELECT id, sequence_number, event_type, user_id, transaction_id, description,
           data, host(ip_address), user_agent, created_at
    FROM audit_logs
    WHERE ($1::text IS NULL OR event_type = $1)
      AND ($2::uuid IS NULL OR user_id = $2)
      AND ($3::uuid IS NULL OR transaction_id = $3)
    ORDER BY created_at DESC, sequence_number DESC
"#;

const AUDIT_SELECT_OLDEST: &str = r#"
    SELECT id, sequence_number, event_type, user_id, transaction_id, description,
           data, host(ip_address), user_agent, created_at
    FROM audit_logs
    WHERE ($1::text IS NULL OR event_type = $1)
      AND ($2::uuid IS NULL OR user_id = $2)
      AND ($3::uuid IS NULL OR transaction_id = $3)
    ORDER BY created_at ASC, sequence_number ASC
"#;

fn corrupt(table: &str, id: Uuid, what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{} {}: {}", table, id, what))
}

fn user_from_row(row: UserRow) -> StoreResult<User> {
    let (id, email, display_name, recipient_id, balance, is_staff, created_at) = row;
    Ok(User {
        id,
        email,
        display_name,
        recipient_id: recipient_id
            .parse()
            .map_err(|e| corrupt("users", id, e))?,
        balance: Balance::new(balance).map_err(|e| corrupt("users", id, e))?,
        is_staff,
        created_at,
    })
}

fn transaction_from_row(row: TransactionRow) -> StoreResult<Transaction> {
    let (
        id,
        reference_id,
        transaction_hash,
        from_user,
        from_recipient_id,
        to_user,
        to_recipient_id,
        amount,
        transaction_type,
        status,
        description,
        created_at,
    ) = row;

    let from_recipient_id = from_recipient_id
        .map(|r| r.parse::<RecipientId>())
        .transpose()
        .map_err(|e| corrupt("transactions", id, e))?;

    Ok(Transaction {
        id,
        reference_id,
        transaction_hash,
        from_user,
        from_recipient_id,
        to_user,
        to_recipient_id: to_recipient_id
            .parse()
            .map_err(|e| corrupt("transactions", id, e))?,
        amount: Amount::new(amount).map_err(|e| corrupt("transactions", id, e))?,
        transaction_type: transaction_type
            .parse()
            .map_err(|e| corrupt("transactions", id, e))?,
        status: status.parse().map_err(|e| corrupt("transactions", id, e))?,
        description,
        created_at,
    })
}

fn audit_from_row(row: AuditRow) -> StoreResult<AuditLogEntry> {
    let (
        id,
        sequence_number,
        event_type,
        user_id,
        transaction_id,
        description,
        data,
        ip,
        user_agent,
        created_at,
    ) = row;

    let ip_address = ip
        .map(|s| s.parse::<IpAddr>())
        .transpose()
        .map_err(|e| corrupt("audit_logs", id, e))?;

    Ok(AuditLogEntry::from_stored(
        NewAuditEntry {
            id,
            event_type: event_type
                .parse()
                .map_err(|e| corrupt("audit_logs", id, e))?,
            user_id,
            transaction_id,
            description,
            data: serde_json::from_value::<AuditData>(data)?,
            ip_address,
            user_agent,
            created_at,
        },
        sequence_number,
    ))
}

/// PostgreSQL-backed ledger store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_secs(5),
        }
    }

    /// Upper bound a unit of work waits for a row lock
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// A unit of work backed by a database transaction. Rolled back on drop.
pub struct PgLedgerTx {
    tx: PgTransaction<'static, Postgres>,
}

impl PgLedgerTx {
    async fn select_user_for_update(&mut self, id: Uuid) -> StoreResult<User> {
        let sql = format!("SELECT {} FROM users WHERE id = $1 FOR UPDATE", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(user_from_row)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
    }
}

#[async_trait]
impl AuditSink for PgLedgerTx {
    async fn insert_audit(&mut self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let data = serde_json::to_value(&entry.data)?;

        let sequence_number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_logs (
                id, event_type, user_id, transaction_id, description,
                data, ip_address, user_agent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::inet, $8, $9)
            RETURNING sequence_number
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_type.as_str())
        .bind(entry.user_id)
        .bind(entry.transaction_id)
        .bind(&entry.description)
        .bind(&data)
        .bind(entry.ip_address.map(|ip| ip.to_string()))
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(AuditLogEntry::from_stored(entry, sequence_number))
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_pair(&mut self, first: Uuid, second: Uuid) -> StoreResult<(User, User)> {
        // Fixed lock order avoids deadlocks between opposite-direction transfers
        let sql = format!(
            "SELECT {} FROM users WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            USER_COLUMNS
        );
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(vec![first, second])
            .fetch_all(&mut *self.tx)
            .await?;

        let users = rows
            .into_iter()
            .map(user_from_row)
            .collect::<StoreResult<Vec<User>>>()?;

        let pick = |id: Uuid| -> StoreResult<User> {
            users
                .iter()
                .find(|u| u.id == id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))
        };

        Ok((pick(first)?, pick(second)?))
    }

    async fn lock_user(&mut self, id: Uuid) -> StoreResult<User> {
        self.select_user_for_update(id).await
    }

    async fn lock_transaction(&mut self, reference_id: &str) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE reference_id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(reference_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(transaction_from_row).transpose()
    }

    async fn insert_user(&mut self, user: &NewUser) -> StoreResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, recipient_id, balance, is_staff, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.recipient_id.as_str())
        .bind(user.balance.value())
        .bind(user.is_staff)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(user.clone().into_user())
    }

    async fn insert_transaction(&mut self, t: &Transaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, reference_id, transaction_hash, from_user, from_recipient_id,
                to_user, to_recipient_id, amount, transaction_type, status,
                description, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(t.id)
        .bind(&t.reference_id)
        .bind(&t.transaction_hash)
        .bind(t.from_user)
        .bind(t.from_recipient_id.as_ref().map(|r| r.as_str().to_string()))
        .bind(t.to_user)
        .bind(t.to_recipient_id.as_str())
        .bind(t.amount.value())
        .bind(t.transaction_type.as_str())
        .bind(t.status.as_str())
        .bind(&t.description)
        .bind(t.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn set_balance(&mut self, user_id: Uuid, balance: Balance) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET balance = $2 WHERE id = $1")
            .bind(user_id)
            .bind(balance.value())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE transactions SET status = $3 WHERE id = $1 AND status = $2")
                .bind(transaction_id)
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                .bind(transaction_id)
                .fetch_optional(&mut *self.tx)
                .await?;

        match current {
            None => Err(StoreError::NotFound(format!("transaction {}", transaction_id))),
            Some(found) => Err(StoreError::StatusConflict {
                found: found
                    .parse()
                    .map_err(|e| corrupt("transactions", transaction_id, e))?,
                requested: to,
            }),
        }
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> StoreResult<PgLedgerTx> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(PgLedgerTx { tx })
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(user_from_row).transpose()
    }

    async fn find_user_by_recipient_id(
        &self,
        recipient_id: &RecipientId,
    ) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE recipient_id = $1", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(recipient_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn find_transaction(&self, reference_id: &str) -> StoreResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE reference_id = $1",
            TRANSACTION_COLUMNS
        );
        let row: Option<TransactionRow> = sqlx::query_as(&sql)
            .bind(reference_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(transaction_from_row).transpose()
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> StoreResult<Vec<Transaction>> {
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE ($1::uuid IS NULL OR from_user = $1 OR to_user = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        );
        let rows: Vec<TransactionRow> = sqlx::query_as(&sql)
            .bind(query.party)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    async fn find_audit_entry(&self, id: Uuid) -> StoreResult<Option<AuditLogEntry>> {
        let row: Option<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, event_type, user_id, transaction_id, description,
                   data, host(ip_address), user_agent, created_at
            FROM audit_logs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(audit_from_row).transpose()
    }

    fn query_audit(&self, query: AuditQuery) -> BoxStream<'_, StoreResult<AuditLogEntry>> {
        let sql = match query.order {
            SortOrder::NewestFirst => AUDIT_SELECT_NEWEST,
            SortOrder::OldestFirst => AUDIT_SELECT_OLDEST,
        };

        sqlx::query_as::<_, AuditRow>(sql)
            .bind(query.event_type.map(|t| t.as_str()))
            .bind(query.user_id)
            .bind(query.transaction_id)
            .fetch(&self.pool)
            .map(|row| row.map_err(StoreError::from).and_then(audit_from_row))
            .boxed()
    }
}
