//! Open Account Handler
//!
//! Creates a user with a fresh recipient id and the configured starting
//! balance, and records `account_created` in the same unit of work.

use crate::audit::{self, AuditData, AuditEventType, AuditRecord};
use crate::domain::{Balance, ClientContext, NewUser, User};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx, StoreError};

use super::OpenAccountCommand;

/// Attempts at drawing an unused recipient id
const MAX_RECIPIENT_ID_ATTEMPTS: u32 = 5;

/// Handler for opening accounts
#[derive(Debug, Clone)]
pub struct OpenAccountHandler<S: LedgerStore> {
    store: S,
    starting_balance: Balance,
}

impl<S: LedgerStore> OpenAccountHandler<S> {
    pub fn new(store: S, starting_balance: Balance) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    pub async fn execute(
        &self,
        command: OpenAccountCommand,
        context: Option<&ClientContext>,
    ) -> AppResult<User> {
        let email = command.email.trim().to_ascii_lowercase();
        let display_name = command.display_name.trim().to_string();

        if email.is_empty() || !email.contains('@') {
            return Err(AppError::InvalidRequest("A valid email is required".to_string()));
        }
        if display_name.is_empty() {
            return Err(AppError::InvalidRequest("Display name is required".to_string()));
        }

        for attempt in 1..=MAX_RECIPIENT_ID_ATTEMPTS {
            let new_user =
                NewUser::new(&email, &display_name, self.starting_balance).staff(command.is_staff);

            // A unique violation poisons the unit, so each attempt gets a fresh one
            let mut tx = self.store.begin().await?;
            let user = match tx.insert_user(&new_user).await {
                Ok(user) => user,
                Err(StoreError::Duplicate(constraint)) if constraint.contains("recipient_id") => {
                    tracing::warn!(attempt, "Recipient id collision, drawing another");
                    continue;
                }
                Err(StoreError::Duplicate(_)) => {
                    return Err(AppError::Conflict(format!(
                        "email {} is already registered",
                        email
                    )));
                }
                Err(e) => return Err(e.into()),
            };

            let record = AuditRecord::new(
                AuditEventType::AccountCreated,
                format!("Account opened for {}", user.display_name),
            )
            .user(user.id)
            .data(
                AuditData::new()
                    .with("recipient_id", &user.recipient_id)
                    .with("display_name", user.display_name.clone())
                    .with("starting_balance", user.balance.value())
                    .with("is_staff", user.is_staff),
            );
            audit::record_in(&mut tx, record, context).await?;
            tx.commit().await?;

            tracing::info!(
                user_id = %user.id,
                recipient_id = %user.recipient_id,
                "Account opened"
            );
            return Ok(user);
        }

        Err(AppError::Internal(format!(
            "no free recipient id after {} attempts",
            MAX_RECIPIENT_ID_ATTEMPTS
        )))
    }
}
