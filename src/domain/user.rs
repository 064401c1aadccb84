//! User / account model
//!
//! Balance lives on the user row. It is only mutated by ledger handlers
//! inside a unit of work, and users are never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Balance, RecipientId};

/// A ledger participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub recipient_id: RecipientId,
    pub balance: Balance,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

/// Values needed to insert a new user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub recipient_id: RecipientId,
    pub balance: Balance,
    pub is_staff: bool,
    pub created_at: DateTime<Utc>,
}

impl NewUser {
    pub fn new(
        email: impl Into<String>,
        display_name: impl Into<String>,
        balance: Balance,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            display_name: display_name.into(),
            recipient_id: RecipientId::generate(),
            balance,
            is_staff: false,
            created_at: Utc::now(),
        }
    }

    pub fn staff(mut self, is_staff: bool) -> Self {
        self.is_staff = is_staff;
        self
    }

    pub fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            recipient_id: self.recipient_id,
            balance: self.balance,
            is_staff: self.is_staff,
            created_at: self.created_at,
        }
    }
}
