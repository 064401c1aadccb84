//! Audit Recorder
//!
//! Append-only writer and lazy reader for the audit trail. A failed audit write
//! is an error for the caller, never swallowed.

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use crate::domain::ClientContext;
use crate::error::{AppError, AppResult};
use crate::store::{AuditSink, LedgerStore, LedgerTx};

use super::{AuditData, AuditEventType, AuditLogEntry, AuditQuery, NewAuditEntry};

/// Builder for creating audit records
#[derive(Debug, Clone)]
pub struct AuditRecord {
    event_type: AuditEventType,
    user_id: Option<Uuid>,
    transaction_id: Option<Uuid>,
    description: String,
    data: AuditData,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            user_id: None,
            transaction_id: None,
            description: description.into(),
            data: AuditData::new(),
        }
    }

    /// Set the user the entry is about
    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the transaction the entry is about
    pub fn transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Set the payload snapshot
    pub fn data(mut self, data: impl Into<AuditData>) -> Self {
        self.data = data.into();
        self
    }

    /// Validate the payload and stamp id, time and client metadata.
    fn into_entry(self, context: Option<&ClientContext>) -> AppResult<NewAuditEntry> {
        self.data.validate()?;

        Ok(NewAuditEntry {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            user_id: self.user_id,
            transaction_id: self.transaction_id,
            description: self.description,
            data: self.data,
            ip_address: context.and_then(|c| c.ip_address),
            user_agent: context.map(|c| c.user_agent.clone()).unwrap_or_default(),
            created_at: Utc::now(),
        })
    }
}

/// Write one audit entry through an open unit of work.
///
/// Handlers use this so the entry commits or rolls back together with the
/// change it describes.
pub async fn record_in<A: AuditSink>(
    sink: &mut A,
    record: AuditRecord,
    context: Option<&ClientContext>,
) -> AppResult<AuditLogEntry> {
    let entry = record.into_entry(context)?;
    let stored = sink.insert_audit(entry).await?;

    tracing::debug!(
        audit_id = %stored.id(),
        sequence = stored.sequence_number(),
        event_type = %stored.event_type(),
        correlation_id = ?context.and_then(|c| c.correlation_id),
        "Audit log entry created"
    );

    Ok(stored)
}

/// Audit Recorder over a ledger store
#[derive(Debug, Clone)]
pub struct AuditRecorder<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> AuditRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record a standalone event (login, logout, ...) in its own unit of work.
    pub async fn record(
        &self,
        record: AuditRecord,
        context: Option<&ClientContext>,
    ) -> AppResult<AuditLogEntry> {
        let mut tx = self.store.begin().await?;
        let entry = record_in(&mut tx, record, context).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Lazily stream entries matching the filters, in `query.order`.
    pub fn query(&self, query: AuditQuery) -> BoxStream<'_, AppResult<AuditLogEntry>> {
        self.store
            .query_audit(query)
            .map(|row| row.map_err(AppError::from))
            .boxed()
    }

    pub async fn get(&self, id: Uuid) -> AppResult<AuditLogEntry> {
        self.store
            .find_audit_entry(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("audit entry {}", id)))
    }
}
