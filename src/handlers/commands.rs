//! Command definitions
//!
//! Commands represent intentions to change the ledger. Inputs arrive as the
//! caller sent them; handlers do the parsing so validation order is theirs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move funds from an authenticated sender to a recipient id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    /// Authenticated sender
    pub sender_id: Uuid,
    /// Public 10-digit recipient identifier, unparsed
    pub recipient_id: String,
    /// Raw amount text; `None` when the caller sent none
    pub amount: Option<String>,
    pub description: Option<String>,
}

impl TransferCommand {
    pub fn new(
        sender_id: Uuid,
        recipient_id: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            recipient_id: recipient_id.into(),
            amount: Some(amount.into()),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// =========================================================================
// DepositCommand
// =========================================================================

/// Command to credit an account from outside the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub recipient_id: String,
    pub amount: Option<String>,
    pub description: Option<String>,
    /// Leave the deposit `pending` until it is settled or failed
    #[serde(default)]
    pub hold: bool,
}

impl DepositCommand {
    pub fn new(recipient_id: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            amount: Some(amount.into()),
            description: None,
            hold: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }
}

// =========================================================================
// OpenAccountCommand
// =========================================================================

/// Command to open a new account with the configured starting balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccountCommand {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub is_staff: bool,
}

impl OpenAccountCommand {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            is_staff: false,
        }
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}

// =========================================================================
// FailTransactionCommand
// =========================================================================

/// Command to reject a pending transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailTransactionCommand {
    pub reference_id: String,
    pub reason: String,
}

impl FailTransactionCommand {
    pub fn new(reference_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            reason: reason.into(),
        }
    }
}
