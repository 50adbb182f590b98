//! In-memory store with per-account row locks
//!
//! `add_account_balance` and `update_account_balance` take an exclusive lock
//! on the account row and keep it until the scope commits, rolls back or is
//! dropped, like a row-locking database. Scopes run concurrently otherwise.
//! A lock that cannot be taken within the configured timeout fails with
//! `StoreError::Unavailable`, so a circular wait surfaces as an error instead
//! of hanging the test.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{Account, AccountId, CreateAccountParams, Entry, Transfer};
use crate::ports::{LedgerQueries, LedgerStore, StoreScope};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

pub struct RowLockStore {
    tables: Mutex<Tables>,
    /// Locked account -> owning scope
    row_locks: Mutex<HashMap<AccountId, u64>>,
    released: Condvar,
    next_id: AtomicI64,
    next_scope: AtomicU64,
    lock_timeout: Duration,
    hold: Duration,
}

impl RowLockStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            row_locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_id: AtomicI64::new(0),
            next_scope: AtomicU64::new(0),
            lock_timeout,
            hold: Duration::ZERO,
        }
    }

    /// Pause after every row lock is taken, widening the contention window
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Number of rows currently locked by open scopes
    pub fn locked_rows(&self) -> usize {
        self.row_locks.lock().unwrap().len()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn open(&self, autocommit: bool) -> RowLockScope<'_> {
        RowLockScope {
            store: self,
            id: self.next_scope.fetch_add(1, Ordering::SeqCst),
            pending: RefCell::new(Pending::default()),
            autocommit,
            done: Cell::new(false),
        }
    }

    fn acquire(&self, scope: u64, account_id: AccountId) -> StoreResult<()> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut locks = self.row_locks.lock().unwrap();
        loop {
            match locks.get(&account_id) {
                Some(&owner) if owner == scope => return Ok(()),
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::unavailable(format!(
                            "lock wait timeout on account {}",
                            account_id
                        )));
                    }
                    locks = self.released.wait_timeout(locks, deadline - now).unwrap().0;
                }
                None => {
                    locks.insert(account_id, scope);
                    break;
                }
            }
        }
        drop(locks);

        if !self.hold.is_zero() {
            thread::sleep(self.hold);
        }
        Ok(())
    }

    fn release_all(&self, scope: u64) {
        let mut locks = self.row_locks.lock().unwrap();
        locks.retain(|_, owner| *owner != scope);
        self.released.notify_all();
    }
}

impl LedgerStore for RowLockStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreScope + '_>> {
        Ok(Box::new(self.open(false)))
    }

    fn connect(&self) -> StoreResult<Box<dyn LedgerQueries + '_>> {
        Ok(Box::new(self.open(true)))
    }
}

/// Writes not yet visible to other scopes
#[derive(Default)]
struct Pending {
    accounts: Vec<Account>,
    deltas: HashMap<AccountId, i64>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

struct RowLockScope<'a> {
    store: &'a RowLockStore,
    id: u64,
    pending: RefCell<Pending>,
    autocommit: bool,
    done: Cell<bool>,
}

impl RowLockScope<'_> {
    /// The account as this scope sees it: committed row plus own changes
    fn account(&self, account_id: AccountId) -> StoreResult<Account> {
        let pending = self.pending.borrow();
        let mut account = match pending.accounts.iter().find(|a| a.id == account_id) {
            Some(account) => account.clone(),
            None => self
                .store
                .tables
                .lock()
                .unwrap()
                .accounts
                .get(&account_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("account {}", account_id)))?,
        };
        account.balance += pending.deltas.get(&account_id).copied().unwrap_or(0);
        Ok(account)
    }

    fn require_account(&self, account_id: AccountId) -> StoreResult<()> {
        self.account(account_id)
            .map(|_| ())
            .map_err(|_| StoreError::constraint(format!("account {} does not exist", account_id)))
    }

    fn finish(&self, commit: bool) {
        if self.done.replace(true) {
            return;
        }
        if commit {
            let pending = self.pending.take();
            let mut tables = self.store.tables.lock().unwrap();
            for account in pending.accounts {
                tables.accounts.insert(account.id, account);
            }
            for (account_id, delta) in pending.deltas {
                if let Some(account) = tables.accounts.get_mut(&account_id) {
                    account.balance += delta;
                }
            }
            for entry in pending.entries {
                tables.entries.insert(entry.id, entry);
            }
            for transfer in pending.transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
        }
        self.store.release_all(self.id);
    }
}

impl Drop for RowLockScope<'_> {
    fn drop(&mut self) {
        self.finish(self.autocommit);
    }
}

impl LedgerQueries for RowLockScope<'_> {
    fn create_account(&self, params: &CreateAccountParams) -> StoreResult<Account> {
        params.validate().map_err(StoreError::constraint)?;
        let account = Account {
            id: self.store.next_id(),
            owner: params.owner.clone(),
            balance: params.balance,
            currency: Account::normalize_currency(&params.currency),
            created_at: Utc::now(),
        };
        self.pending.borrow_mut().accounts.push(account.clone());
        Ok(account)
    }

    fn get_account(&self, id: AccountId) -> StoreResult<Account> {
        self.account(id)
    }

    fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let ids: Vec<AccountId> = {
            let tables = self.store.tables.lock().unwrap();
            let pending = self.pending.borrow();
            let mut ids: Vec<AccountId> = tables.accounts.keys().copied().collect();
            ids.extend(pending.accounts.iter().map(|a| a.id));
            ids
        };
        let mut accounts = ids
            .into_iter()
            .map(|id| self.account(id))
            .collect::<StoreResult<Vec<_>>>()?;
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    fn update_account_balance(&self, id: AccountId, balance: i64) -> StoreResult<Account> {
        self.store.acquire(self.id, id)?;
        let current = self.account(id)?;
        *self.pending.borrow_mut().deltas.entry(id).or_insert(0) += balance - current.balance;
        self.account(id)
    }

    fn add_account_balance(&self, id: AccountId, delta: i64) -> StoreResult<Account> {
        self.store.acquire(self.id, id)?;
        self.account(id)?;
        *self.pending.borrow_mut().deltas.entry(id).or_insert(0) += delta;
        self.account(id)
    }

    fn create_entry(&self, account_id: AccountId, amount: i64) -> StoreResult<Entry> {
        self.require_account(account_id)?;
        let entry = Entry {
            id: self.store.next_id(),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.pending.borrow_mut().entries.push(entry.clone());
        Ok(entry)
    }

    fn get_entry(&self, id: i64) -> StoreResult<Entry> {
        if let Some(entry) = self.pending.borrow().entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }
        self.store
            .tables
            .lock()
            .unwrap()
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("entry {}", id)))
    }

    fn list_entries(&self, account_id: AccountId) -> StoreResult<Vec<Entry>> {
        let mut entries: Vec<Entry> = self
            .store
            .tables
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.extend(
            self.pending
                .borrow()
                .entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    fn create_transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> StoreResult<Transfer> {
        self.require_account(from_account_id)?;
        self.require_account(to_account_id)?;
        if amount <= 0 {
            return Err(StoreError::constraint("CHECK constraint failed: transfers"));
        }
        let transfer = Transfer {
            id: self.store.next_id(),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.pending.borrow_mut().transfers.push(transfer.clone());
        Ok(transfer)
    }

    fn get_transfer(&self, id: i64) -> StoreResult<Transfer> {
        if let Some(transfer) = self.pending.borrow().transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }
        self.store
            .tables
            .lock()
            .unwrap()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("transfer {}", id)))
    }

    fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> StoreResult<Vec<Transfer>> {
        let matches =
            |t: &&Transfer| t.from_account_id == from_account_id && t.to_account_id == to_account_id;
        let mut transfers: Vec<Transfer> = self
            .store
            .tables
            .lock()
            .unwrap()
            .transfers
            .values()
            .filter(matches)
            .cloned()
            .collect();
        transfers.extend(self.pending.borrow().transfers.iter().filter(matches).cloned());
        transfers.sort_by_key(|t| t.id);
        Ok(transfers)
    }
}

impl StoreScope for RowLockScope<'_> {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.finish(true);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.finish(false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn open_pair(store: &RowLockStore) -> (AccountId, AccountId) {
        let handle = store.connect().unwrap();
        let a = handle
            .create_account(&CreateAccountParams::new("alice", 100, "USD"))
            .unwrap();
        let b = handle
            .create_account(&CreateAccountParams::new("bob", 100, "USD"))
            .unwrap();
        (a.id, b.id)
    }

    #[test]
    fn test_row_lock_held_until_scope_ends() {
        let store = RowLockStore::new(Duration::from_millis(50));
        let (a, _) = open_pair(&store);

        let first = store.begin().unwrap();
        first.add_account_balance(a, 10).unwrap();
        assert_eq!(store.locked_rows(), 1);

        let second = store.begin().unwrap();
        let err = second.add_account_balance(a, 10).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        second.rollback().unwrap();

        first.commit().unwrap();
        assert_eq!(store.locked_rows(), 0);
        assert_eq!(store.connect().unwrap().get_account(a).unwrap().balance, 110);
    }

    #[test]
    fn test_rollback_discards_pending_writes() {
        let store = RowLockStore::new(Duration::from_millis(50));
        let (a, b) = open_pair(&store);

        let scope = store.begin().unwrap();
        scope.create_transfer(a, b, 5).unwrap();
        scope.add_account_balance(a, -5).unwrap();
        scope.rollback().unwrap();

        let handle = store.connect().unwrap();
        assert_eq!(handle.get_account(a).unwrap().balance, 100);
        assert!(handle.list_transfers(a, b).unwrap().is_empty());
    }

    /// Two scopes each lock one row, then reach for the other's row
    #[test]
    fn test_reversed_lock_order_times_out() {
        let store = Arc::new(RowLockStore::new(Duration::from_millis(200)));
        let (a, b) = open_pair(&store);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [(a, b), (b, a)]
            .into_iter()
            .map(|(first, second)| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let scope = store.begin().unwrap();
                    scope.add_account_balance(first, -1).unwrap();
                    barrier.wait();
                    let result = scope.add_account_balance(second, 1);
                    scope.rollback().unwrap();
                    result
                })
            })
            .collect();

        let timed_out = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Err(StoreError::Unavailable(_))))
            .count();

        assert!(timed_out >= 1, "circular wait was not detected");
        assert_eq!(store.locked_rows(), 0);
    }
}
