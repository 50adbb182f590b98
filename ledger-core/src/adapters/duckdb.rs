//! DuckDB store implementation

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection, Row};

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{Account, AccountId, CreateAccountParams, Entry, Transfer};
use crate::ports::{LedgerQueries, LedgerStore, StoreScope};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// DuckDB-backed ledger store
///
/// DuckDB admits one writer per connection, so the store owns a single
/// connection behind a mutex. A transaction scope holds the lock from BEGIN
/// until COMMIT or ROLLBACK, which gives every in-flight unit of work
/// exclusive use of the connection.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
}

impl DuckDbStore {
    /// Open (or create) a ledger database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process still holds the database open.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max_retries = MAX_RETRIES,
                            error = %err_msg,
                            "Database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// Open a throwaway in-memory ledger (tests, demos)
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Disable extension autoloading; the ledger only needs core SQL
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(conn)
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Take the connection
    ///
    /// A poisoned lock is recovered: a scope abandoned by a panic has already
    /// rolled back in `Drop`, so the connection is back in autocommit mode.
    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // === Doctor checks ===

    /// Entries whose account no longer exists, as "entry_id:account_id"
    pub fn check_orphaned_entries(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.account_id FROM entries e
             LEFT JOIN accounts a ON e.account_id = a.id
             WHERE a.id IS NULL
             ORDER BY e.id",
        )?;

        let orphans = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let account_id: i64 = row.get(1)?;
                Ok(format!("{}:{}", id, account_id))
            })?
            .collect::<duckdb::Result<Vec<String>>>()?;

        Ok(orphans)
    }

    /// Transfers naming an account that no longer exists, as "transfer_id:account_id"
    pub fn check_orphaned_transfers(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.from_account_id, t.to_account_id,
                    f.id IS NULL AS from_missing
             FROM transfers t
             LEFT JOIN accounts f ON t.from_account_id = f.id
             LEFT JOIN accounts d ON t.to_account_id = d.id
             WHERE f.id IS NULL OR d.id IS NULL
             ORDER BY t.id",
        )?;

        let orphans = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let from: i64 = row.get(1)?;
                let to: i64 = row.get(2)?;
                let from_missing: bool = row.get(3)?;
                let missing = if from_missing { from } else { to };
                Ok(format!("{}:{}", id, missing))
            })?
            .collect::<duckdb::Result<Vec<String>>>()?;

        Ok(orphans)
    }

    /// Sum of every entry amount in the ledger
    pub fn sum_entry_amounts(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let sum: i64 = conn.query_row(
            "SELECT CAST(COALESCE(SUM(amount), 0) AS BIGINT) FROM entries",
            [],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    pub fn count_entries(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_transfers(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Accounts whose balance is below zero, as "account_id:balance"
    pub fn check_negative_balances(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, balance FROM accounts WHERE balance < 0 ORDER BY id")?;

        let accounts = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let balance: i64 = row.get(1)?;
                Ok(format!("{}:{}", id, balance))
            })?
            .collect::<duckdb::Result<Vec<String>>>()?;

        Ok(accounts)
    }
}

impl LedgerStore for DuckDbStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreScope + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(Box::new(DuckDbScope { conn, open: true }))
    }

    fn connect(&self) -> StoreResult<Box<dyn LedgerQueries + '_>> {
        let conn = self.lock()?;
        Ok(Box::new(DuckDbHandle { conn }))
    }
}

/// Transaction scope holding the connection lock until commit or rollback
struct DuckDbScope<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
}

impl StoreScope for DuckDbScope<'_> {
    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.open = false;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            // Leave the connection in autocommit mode for the next caller
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(
                    error = %rollback,
                    "Failed to roll back after commit failure"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for DuckDbScope<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}

/// Autocommit handle: every call is its own transaction
struct DuckDbHandle<'a> {
    conn: MutexGuard<'a, Connection>,
}

macro_rules! delegate_queries {
    ($ty:ty) => {
        impl LedgerQueries for $ty {
            fn create_account(&self, params: &CreateAccountParams) -> StoreResult<Account> {
                create_account(&self.conn, params)
            }

            fn get_account(&self, id: AccountId) -> StoreResult<Account> {
                get_account(&self.conn, id)
            }

            fn list_accounts(&self) -> StoreResult<Vec<Account>> {
                list_accounts(&self.conn)
            }

            fn update_account_balance(&self, id: AccountId, balance: i64) -> StoreResult<Account> {
                update_account_balance(&self.conn, id, balance)
            }

            fn add_account_balance(&self, id: AccountId, delta: i64) -> StoreResult<Account> {
                add_account_balance(&self.conn, id, delta)
            }

            fn create_entry(&self, account_id: AccountId, amount: i64) -> StoreResult<Entry> {
                create_entry(&self.conn, account_id, amount)
            }

            fn get_entry(&self, id: i64) -> StoreResult<Entry> {
                get_entry(&self.conn, id)
            }

            fn list_entries(&self, account_id: AccountId) -> StoreResult<Vec<Entry>> {
                list_entries(&self.conn, account_id)
            }

            fn create_transfer(
                &self,
                from_account_id: AccountId,
                to_account_id: AccountId,
                amount: i64,
            ) -> StoreResult<Transfer> {
                create_transfer(&self.conn, from_account_id, to_account_id, amount)
            }

            fn get_transfer(&self, id: i64) -> StoreResult<Transfer> {
                get_transfer(&self.conn, id)
            }

            fn list_transfers(
                &self,
                from_account_id: AccountId,
                to_account_id: AccountId,
            ) -> StoreResult<Vec<Transfer>> {
                list_transfers(&self.conn, from_account_id, to_account_id)
            }
        }
    };
}

delegate_queries!(DuckDbScope<'_>);
delegate_queries!(DuckDbHandle<'_>);

// === Queries ===
//
// Each query takes the connection it runs on. Inside a scope that connection
// is mid-transaction, so the statement joins it.

fn create_account(conn: &Connection, params: &CreateAccountParams) -> StoreResult<Account> {
    params.validate().map_err(StoreError::constraint)?;

    let created_at = Utc::now();
    let currency = Account::normalize_currency(&params.currency);
    let id: i64 = conn.query_row(
        "INSERT INTO accounts (owner, balance, currency, created_at)
         VALUES (?, ?, ?, ?)
         RETURNING id",
        params![params.owner, params.balance, currency, created_at.to_rfc3339()],
        |row| row.get(0),
    )?;

    Ok(Account {
        id,
        owner: params.owner.clone(),
        balance: params.balance,
        currency,
        created_at,
    })
}

fn get_account(conn: &Connection, id: AccountId) -> StoreResult<Account> {
    let sql = format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS);
    conn.query_row(&sql, params![id], row_to_account)
        .map_err(|e| not_found_as(e, || format!("account {}", id)))
}

fn list_accounts(conn: &Connection) -> StoreResult<Vec<Account>> {
    let sql = format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map([], row_to_account)?
        .collect::<duckdb::Result<Vec<Account>>>()?;
    Ok(accounts)
}

fn update_account_balance(conn: &Connection, id: AccountId, balance: i64) -> StoreResult<Account> {
    let sql = format!(
        "UPDATE accounts SET balance = ? WHERE id = ? RETURNING {}",
        ACCOUNT_COLUMNS
    );
    conn.query_row(&sql, params![balance, id], row_to_account)
        .map_err(|e| not_found_as(e, || format!("account {}", id)))
}

fn add_account_balance(conn: &Connection, id: AccountId, delta: i64) -> StoreResult<Account> {
    let sql = format!(
        "UPDATE accounts SET balance = balance + ? WHERE id = ? RETURNING {}",
        ACCOUNT_COLUMNS
    );
    conn.query_row(&sql, params![delta, id], row_to_account)
        .map_err(|e| not_found_as(e, || format!("account {}", id)))
}

fn create_entry(conn: &Connection, account_id: AccountId, amount: i64) -> StoreResult<Entry> {
    ensure_account_exists(conn, account_id)?;

    let created_at = Utc::now();
    let id: i64 = conn.query_row(
        "INSERT INTO entries (account_id, amount, created_at)
         VALUES (?, ?, ?)
         RETURNING id",
        params![account_id, amount, created_at.to_rfc3339()],
        |row| row.get(0),
    )?;

    Ok(Entry {
        id,
        account_id,
        amount,
        created_at,
    })
}

fn get_entry(conn: &Connection, id: i64) -> StoreResult<Entry> {
    let sql = format!("SELECT {} FROM entries WHERE id = ?", ENTRY_COLUMNS);
    conn.query_row(&sql, params![id], row_to_entry)
        .map_err(|e| not_found_as(e, || format!("entry {}", id)))
}

fn list_entries(conn: &Connection, account_id: AccountId) -> StoreResult<Vec<Entry>> {
    let sql = format!(
        "SELECT {} FROM entries WHERE account_id = ? ORDER BY id",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![account_id], row_to_entry)?
        .collect::<duckdb::Result<Vec<Entry>>>()?;
    Ok(entries)
}

fn create_transfer(
    conn: &Connection,
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: i64,
) -> StoreResult<Transfer> {
    ensure_account_exists(conn, from_account_id)?;
    ensure_account_exists(conn, to_account_id)?;

    let created_at = Utc::now();
    let id: i64 = conn.query_row(
        "INSERT INTO transfers (from_account_id, to_account_id, amount, created_at)
         VALUES (?, ?, ?, ?)
         RETURNING id",
        params![from_account_id, to_account_id, amount, created_at.to_rfc3339()],
        |row| row.get(0),
    )?;

    Ok(Transfer {
        id,
        from_account_id,
        to_account_id,
        amount,
        created_at,
    })
}

fn get_transfer(conn: &Connection, id: i64) -> StoreResult<Transfer> {
    let sql = format!("SELECT {} FROM transfers WHERE id = ?", TRANSFER_COLUMNS);
    conn.query_row(&sql, params![id], row_to_transfer)
        .map_err(|e| not_found_as(e, || format!("transfer {}", id)))
}

fn list_transfers(
    conn: &Connection,
    from_account_id: AccountId,
    to_account_id: AccountId,
) -> StoreResult<Vec<Transfer>> {
    let sql = format!(
        "SELECT {} FROM transfers
         WHERE from_account_id = ? AND to_account_id = ?
         ORDER BY id",
        TRANSFER_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let transfers = stmt
        .query_map(params![from_account_id, to_account_id], row_to_transfer)?
        .collect::<duckdb::Result<Vec<Transfer>>>()?;
    Ok(transfers)
}

/// Referential check standing in for a foreign key on account_id columns
fn ensure_account_exists(conn: &Connection, account_id: AccountId) -> StoreResult<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE id = ?",
        params![account_id],
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(StoreError::constraint(format!(
            "account {} does not exist",
            account_id
        )));
    }
    Ok(())
}

fn not_found_as(err: duckdb::Error, what: impl FnOnce() -> String) -> StoreError {
    match err {
        duckdb::Error::QueryReturnedNoRows => StoreError::not_found(what()),
        other => other.into(),
    }
}

// Row mapping. Column order follows the *_COLUMNS constants.

fn row_to_account(row: &Row<'_>) -> duckdb::Result<Account> {
    let created_str: String = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        owner: row.get(1)?,
        balance: row.get(2)?,
        currency: row.get(3)?,
        created_at: parse_timestamp(4, &created_str)?,
    })
}

fn row_to_entry(row: &Row<'_>) -> duckdb::Result<Entry> {
    let created_str: String = row.get(3)?;
    Ok(Entry {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount: row.get(2)?,
        created_at: parse_timestamp(3, &created_str)?,
    })
}

fn row_to_transfer(row: &Row<'_>) -> duckdb::Result<Transfer> {
    let created_str: String = row.get(4)?;
    Ok(Transfer {
        id: row.get(0)?,
        from_account_id: row.get(1)?,
        to_account_id: row.get(2)?,
        amount: row.get(3)?,
        created_at: parse_timestamp(4, &created_str)?,
    })
}

// Helper functions

fn parse_timestamp(idx: usize, s: &str) -> duckdb::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
