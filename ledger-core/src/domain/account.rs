//! Account domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account identifier, assigned by the store
pub type AccountId = i64;

/// A ledger account
///
/// `balance` is kept in minor currency units (cents). It only changes inside
/// a transfer, where it moves in lockstep with the entries written for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: i64,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Normalize currency code to uppercase
    pub fn normalize_currency(currency: &str) -> String {
        currency.trim().to_uppercase()
    }
}

/// Parameters for opening a new account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, balance: i64, currency: &str) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency: Account::normalize_currency(currency),
        }
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.owner.trim().is_empty() {
            return Err("account owner cannot be empty");
        }
        // Balances only go below zero through a transfer, and only when overdraft is allowed
        if self.balance < 0 {
            return Err("opening balance cannot be negative");
        }
        if self.currency.trim().is_empty() {
            return Err("currency cannot be empty");
        }
        if self.currency.trim().len() != 3 {
            return Err("currency must be a three letter ISO 4217 code");
        }
        Ok(())
    }
}
