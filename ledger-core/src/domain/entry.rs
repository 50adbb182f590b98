//! Ledger entry domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// One signed balance movement on a single account
///
/// Entries are written once, inside the transfer that caused them, and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: AccountId,
    /// Negative for debits, positive for credits
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}
