//! Store port - data access for accounts, entries and transfers

use crate::domain::result::StoreResult;
use crate::domain::{Account, AccountId, CreateAccountParams, Entry, Transfer};

/// Single-row data access primitives
///
/// Every call is one round trip against whichever handle it is invoked on.
/// A handle is either a transaction scope from [`LedgerStore::begin`] or an
/// autocommit handle from [`LedgerStore::connect`]; there is no implicit
/// connection behind these methods.
pub trait LedgerQueries {
    // === Accounts ===

    /// Open a new account
    fn create_account(&self, params: &CreateAccountParams) -> StoreResult<Account>;

    /// Get account by ID
    fn get_account(&self, id: AccountId) -> StoreResult<Account>;

    /// Get all accounts, ordered by ID
    fn list_accounts(&self) -> StoreResult<Vec<Account>>;

    /// Set an account balance to an absolute value
    fn update_account_balance(&self, id: AccountId, balance: i64) -> StoreResult<Account>;

    /// Add a signed delta to an account balance, returning the updated row
    fn add_account_balance(&self, id: AccountId, delta: i64) -> StoreResult<Account>;

    // === Entries ===

    /// Record a signed movement on an account
    fn create_entry(&self, account_id: AccountId, amount: i64) -> StoreResult<Entry>;

    /// Get entry by ID
    fn get_entry(&self, id: i64) -> StoreResult<Entry>;

    /// Get all entries of an account, oldest first
    fn list_entries(&self, account_id: AccountId) -> StoreResult<Vec<Entry>>;

    // === Transfers ===

    /// Record a transfer between two accounts
    fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> StoreResult<Transfer>;

    /// Get transfer by ID
    fn get_transfer(&self, id: i64) -> StoreResult<Transfer>;

    /// Get transfers from one account to another, oldest first
    fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> StoreResult<Vec<Transfer>>;
}

/// A data-access handle bound to one open transaction
///
/// The scope is owned by exactly one in-flight unit of work. Dropping it
/// without calling [`StoreScope::commit`] rolls the transaction back.
pub trait StoreScope: LedgerQueries {
    /// Make every write done through this scope visible
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard every write done through this scope
    fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Factory for transaction scopes and autocommit handles
pub trait LedgerStore: Send + Sync {
    /// Open a new transaction scope
    fn begin(&self) -> StoreResult<Box<dyn StoreScope + '_>>;

    /// Get a handle whose calls each commit on their own
    fn connect(&self) -> StoreResult<Box<dyn LedgerQueries + '_>>;
}
