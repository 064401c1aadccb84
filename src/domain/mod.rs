//! Domain module
//!
//! Core ledger types and their invariants.

pub mod amount;
pub mod context;
pub mod error;
pub mod recipient_id;
pub mod transaction;
pub mod user;

pub use amount::{Amount, AmountError, Balance};
pub use context::{client_ip, ClientContext};
pub use error::DomainError;
pub use recipient_id::{InvalidRecipientId, RecipientId};
pub use transaction::{transaction_hash, Transaction, TransactionStatus, TransactionType};
pub use user::{NewUser, User};
