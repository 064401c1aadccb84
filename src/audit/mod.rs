//! Audit trail
//!
//! Immutable record of domain events. Entries are written through
//! [`record_in`] inside the unit of work that caused them, or through
//! [`AuditRecorder::record`] for standalone events, and read back lazily.

mod entry;
mod integrity;
mod recorder;

pub use entry::{
    AuditData, AuditEventType, AuditLogEntry, AuditQuery, AuditValue, Direction, NewAuditEntry,
    SortOrder, TransactionSnapshot,
};
pub use integrity::{verify_transaction_hashes, IntegrityReport};
pub use recorder::{record_in, AuditRecord, AuditRecorder};
