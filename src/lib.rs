//! AuditFlow Library
//!
//! Peer-to-peer transfer ledger: balances on users, one transaction row per
//! money movement, and an append-only audit trail written in the same unit of
//! work as the change it describes.

pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
mod error;
pub mod handlers;
pub mod store;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, ClientContext, DomainError, RecipientId};
pub use error::{AppError, AppResult, ErrorResponse};
