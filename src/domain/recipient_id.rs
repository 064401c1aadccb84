//! Recipient identifier
//!
//! Public, immutable 10-digit code used to address a user for transfers.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of digits in a recipient identifier
pub const RECIPIENT_ID_LEN: usize = 10;

/// A validated 10-digit recipient identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Recipient ID must be exactly {RECIPIENT_ID_LEN} digits")]
pub struct InvalidRecipientId;

impl RecipientId {
    /// Mint a fresh random identifier. Uniqueness is enforced by the store.
    pub fn generate() -> Self {
        let value: u64 = rand::thread_rng().gen_range(1_000_000_000..=9_999_999_999);
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RecipientId {
    type Err = InvalidRecipientId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == RECIPIENT_ID_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidRecipientId)
        }
    }
}

impl TryFrom<String> for RecipientId {
    type Error = InvalidRecipientId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecipientId> for String {
    fn from(id: RecipientId) -> Self {
        id.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
