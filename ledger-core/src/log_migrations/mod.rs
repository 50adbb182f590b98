//! Log database migrations - embedded SQL files for logs.duckdb
//!
//! Kept separate from the ledger migrations: the event log lives in its own
//! database file and never blocks ledger transactions.

/// All log migrations, embedded at compile time.
/// Format: (filename, sql_content)
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_logs.sql", include_str!("001_logs.sql")),
];
