//! Audit entry types
//!
//! Event types, the schema-free payload, and the read-only entry itself.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{Amount, DomainError, RecipientId, Transaction, User};

const MAX_KEYS: usize = 64;
const MAX_KEY_LEN: usize = 64;
const MAX_TEXT_LEN: usize = 4096;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TransactionCreated,
    TransactionCompleted,
    TransactionFailed,
    BalanceUpdated,
    UserLogin,
    UserLogout,
    AccountCreated,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::TransactionCreated => "transaction_created",
            AuditEventType::TransactionCompleted => "transaction_completed",
            AuditEventType::TransactionFailed => "transaction_failed",
            AuditEventType::BalanceUpdated => "balance_updated",
            AuditEventType::UserLogin => "user_login",
            AuditEventType::UserLogout => "user_logout",
            AuditEventType::AccountCreated => "account_created",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction_created" => Ok(AuditEventType::TransactionCreated),
            "transaction_completed" => Ok(AuditEventType::TransactionCompleted),
            "transaction_failed" => Ok(AuditEventType::TransactionFailed),
            "balance_updated" => Ok(AuditEventType::BalanceUpdated),
            "user_login" => Ok(AuditEventType::UserLogin),
            "user_logout" => Ok(AuditEventType::UserLogout),
            "account_created" => Ok(AuditEventType::AccountCreated),
            other => Err(format!("unknown audit event type '{}'", other)),
        }
    }
}

/// A primitive payload value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for AuditValue {
    fn from(v: bool) -> Self {
        AuditValue::Bool(v)
    }
}

impl From<i64> for AuditValue {
    fn from(v: i64) -> Self {
        AuditValue::Integer(v)
    }
}

impl From<f64> for AuditValue {
    fn from(v: f64) -> Self {
        AuditValue::Float(v)
    }
}

impl From<&str> for AuditValue {
    fn from(v: &str) -> Self {
        AuditValue::Text(v.to_string())
    }
}

impl From<String> for AuditValue {
    fn from(v: String) -> Self {
        AuditValue::Text(v)
    }
}

// Money goes in as text so no precision is lost through JSON numbers.
impl From<Amount> for AuditValue {
    fn from(v: Amount) -> Self {
        AuditValue::Text(v.to_string())
    }
}

impl From<Decimal> for AuditValue {
    fn from(v: Decimal) -> Self {
        AuditValue::Text(v.to_string())
    }
}

impl From<&RecipientId> for AuditValue {
    fn from(v: &RecipientId) -> Self {
        AuditValue::Text(v.to_string())
    }
}

/// Schema-free key/value snapshot attached to an audit entry.
///
/// Keys are strings, values are primitives. Shape varies by event type and is
/// only loosely validated when written (see [`AuditData::validate`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditData(BTreeMap<String, AuditValue>);

impl AuditData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AuditValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AuditValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AuditValue> {
        self.0.get(key)
    }

    /// Text value for a key, if it is text
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AuditValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AuditValue)> {
        self.0.iter()
    }

    /// Loose write-time checks: sane keys, bounded text, finite numbers.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.0.len() > MAX_KEYS {
            return Err(DomainError::InvalidAuditPayload(format!(
                "too many keys ({} > {})",
                self.0.len(),
                MAX_KEYS
            )));
        }

        for (key, value) in &self.0 {
            if key.is_empty() || key.len() > MAX_KEY_LEN || key.trim() != key {
                return Err(DomainError::InvalidAuditPayload(format!("invalid key '{}'", key)));
            }
            match value {
                AuditValue::Float(f) if !f.is_finite() => {
                    return Err(DomainError::InvalidAuditPayload(format!(
                        "non-finite number for '{}'",
                        key
                    )));
                }
                AuditValue::Text(s) if s.len() > MAX_TEXT_LEN => {
                    return Err(DomainError::InvalidAuditPayload(format!(
                        "value for '{}' is too long",
                        key
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Which side of a money movement an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
    Deposit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sent => "sent",
            Direction::Received => "received",
            Direction::Deposit => "deposit",
        }
    }
}

/// Typed payload for transaction lifecycle events.
///
/// Captures participant names as they were at write time; later renames do
/// not change history.
#[derive(Debug, Clone)]
pub struct TransactionSnapshot {
    pub reference_id: String,
    pub transaction_type: String,
    pub amount: Amount,
    pub status: String,
    pub direction: Direction,
    pub sender_recipient_id: Option<RecipientId>,
    pub sender_name: Option<String>,
    pub recipient_recipient_id: RecipientId,
    pub recipient_name: String,
}

impl TransactionSnapshot {
    /// Snapshot a transaction together with its parties as they are now.
    pub fn capture(
        transaction: &Transaction,
        sender: Option<&User>,
        recipient: &User,
        direction: Direction,
    ) -> Self {
        Self {
            reference_id: transaction.reference_id.clone(),
            transaction_type: transaction.transaction_type.to_string(),
            amount: transaction.amount,
            status: transaction.status.to_string(),
            direction,
            sender_recipient_id: sender.map(|u| u.recipient_id.clone()),
            sender_name: sender.map(|u| u.display_name.clone()),
            recipient_recipient_id: recipient.recipient_id.clone(),
            recipient_name: recipient.display_name.clone(),
        }
    }
}

impl From<TransactionSnapshot> for AuditData {
    fn from(s: TransactionSnapshot) -> Self {
        let mut data = AuditData::new()
            .with("reference_id", s.reference_id)
            .with("transaction_type", s.transaction_type)
            .with("amount", s.amount)
            .with("status", s.status)
            .with("direction", s.direction.as_str())
            .with("recipient_recipient_id", &s.recipient_recipient_id)
            .with("recipient_name", s.recipient_name);
        if let Some(id) = &s.sender_recipient_id {
            data.insert("sender_recipient_id", id);
        }
        if let Some(name) = s.sender_name {
            data.insert("sender_name", name);
        }
        data
    }
}

/// Values handed to the store for a new audit row.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub user_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub description: String,
    pub data: AuditData,
    pub ip_address: Option<IpAddr>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted audit entry.
///
/// Fields are read-only: the crate never hands out a way to change or remove
/// an entry once it has been written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogEntry {
    id: Uuid,
    sequence_number: i64,
    event_type: AuditEventType,
    user_id: Option<Uuid>,
    transaction_id: Option<Uuid>,
    description: String,
    data: AuditData,
    ip_address: Option<IpAddr>,
    user_agent: String,
    created_at: DateTime<Utc>,
    is_immutable: bool,
}

impl AuditLogEntry {
    /// Materialise a stored row. Only store adapters build entries.
    pub(crate) fn from_stored(new: NewAuditEntry, sequence_number: i64) -> Self {
        Self {
            id: new.id,
            sequence_number,
            event_type: new.event_type,
            user_id: new.user_id,
            transaction_id: new.transaction_id,
            description: new.description,
            data: new.data,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            created_at: new.created_at,
            is_immutable: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.transaction_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn data(&self) -> &AuditData {
        &self.data
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_immutable(&self) -> bool {
        self.is_immutable
    }
}

/// Result ordering for audit queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Descending creation time (then descending sequence)
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filters for reading the audit trail. All filters are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub user_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub order: SortOrder,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.event_type.map_or(true, |t| entry.event_type == t)
            && self.user_id.map_or(true, |u| entry.user_id == Some(u))
            && self.transaction_id.map_or(true, |t| entry.transaction_id == Some(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(event_type: AuditEventType, user_id: Option<Uuid>) -> AuditLogEntry {
        AuditLogEntry::from_stored(
            NewAuditEntry {
                id: Uuid::new_v4(),
                event_type,
                user_id,
                transaction_id: None,
                description: "test".to_string(),
                data: AuditData::new(),
                ip_address: None,
                user_agent: String::new(),
                created_at: Utc::now(),
            },
            1,
        )
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(AuditEventType::TransactionCompleted.as_str(), "transaction_completed");
        assert_eq!("user_login".parse::<AuditEventType>().unwrap(), AuditEventType::UserLogin);
        assert!("test_event".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn test_audit_data_serializes_flat() {
        let data = AuditData::new()
            .with("amount", "150.00")
            .with("count", 2_i64)
            .with("flag", true);

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json, serde_json::json!({"amount": "150.00", "count": 2, "flag": true}));

        let back: AuditData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_audit_data_validation() {
        assert!(AuditData::new().with("ok", 1.5).validate().is_ok());
        assert!(AuditData::new().with("", "x").validate().is_err());
        assert!(AuditData::new().with(" padded", "x").validate().is_err());
        assert!(AuditData::new().with("nan", f64::NAN).validate().is_err());
        assert!(AuditData::new().with("long", "x".repeat(5000)).validate().is_err());

        let mut wide = AuditData::new();
        for i in 0..65 {
            wide.insert(format!("k{}", i), i as i64);
        }
        assert!(matches!(wide.validate(), Err(DomainError::InvalidAuditPayload(_))));
    }

    #[test]
    fn test_snapshot_into_data() {
        let snapshot = TransactionSnapshot {
            reference_id: "ref-1".to_string(),
            transaction_type: "transfer".to_string(),
            amount: "150".parse().unwrap(),
            status: "completed".to_string(),
            direction: Direction::Sent,
            sender_recipient_id: Some("1111111111".parse().unwrap()),
            sender_name: Some("Alice".to_string()),
            recipient_recipient_id: "2222222222".parse().unwrap(),
            recipient_name: "Bob".to_string(),
        };

        let data: AuditData = snapshot.into();
        assert_eq!(data.text("amount"), Some("150.00"));
        assert_eq!(data.text("direction"), Some("sent"));
        assert_eq!(data.text("sender_name"), Some("Alice"));
        assert_eq!(data.text("recipient_recipient_id"), Some("2222222222"));
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_query_matching() {
        let user = Uuid::new_v4();
        let login = entry(AuditEventType::UserLogin, Some(user));

        assert!(AuditQuery::new().matches(&login));
        assert!(AuditQuery::new().user(user).matches(&login));
        assert!(!AuditQuery::new().user(Uuid::new_v4()).matches(&login));
        assert!(!AuditQuery::new().event_type(AuditEventType::UserLogout).matches(&login));
        assert!(!AuditQuery::new().transaction(Uuid::new_v4()).matches(&login));
        assert_eq!(AuditQuery::new().order, SortOrder::NewestFirst);
    }

    #[test]
    fn test_entry_is_always_immutable() {
        let e = entry(AuditEventType::AccountCreated, None);
        assert!(e.is_immutable());
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["is_immutable"], true);
        assert_eq!(json["event_type"], "account_created");
    }
}
