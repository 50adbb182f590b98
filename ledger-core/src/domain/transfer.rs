//! Transfer domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Entry};

/// A recorded movement of funds between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive, in minor currency units
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Input of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Balance deltas for both sides, ordered by ascending account id.
    ///
    /// Every transfer touching the same pair of accounts updates them in this
    /// order regardless of direction, so two transfers A->B and B->A never
    /// wait on each other's row locks in opposite sequence.
    pub fn lock_order(&self) -> [(AccountId, i64); 2] {
        let debit = (self.from_account_id, -self.amount);
        let credit = (self.to_account_id, self.amount);
        if self.from_account_id <= self.to_account_id {
            [debit, credit]
        } else {
            [credit, debit]
        }
    }
}

/// Everything a committed transfer created or changed
///
/// These are owned snapshots taken inside the transaction; they do not track
/// later changes to the stored rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
