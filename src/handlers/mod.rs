//! Command Handlers module
//!
//! Handlers that apply commands to the ledger. Each handler owns its unit of
//! work and writes its audit entries inside it.

mod account_handler;
mod commands;
mod deposit_handler;
mod fail_handler;
mod transfer_handler;

#[cfg(test)]
mod tests;

pub use account_handler::OpenAccountHandler;
pub use commands::*;
pub use deposit_handler::DepositHandler;
pub use fail_handler::FailTransactionHandler;
pub use transfer_handler::TransferHandler;

use crate::domain::{DomainError, RecipientId, User};
use crate::error::AppResult;
use crate::store::LedgerStore;

/// Resolve a public recipient id. A malformed id resolves to nobody.
pub(crate) async fn resolve_recipient<S: LedgerStore>(store: &S, raw: &str) -> AppResult<User> {
    let not_found = || DomainError::RecipientNotFound(raw.trim().to_string());

    let recipient_id: RecipientId = raw.parse().map_err(|_| not_found())?;
    let user = store
        .find_user_by_recipient_id(&recipient_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(user)
}
