//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the LedgerStore port
//! - A scripted in-memory store for fault injection in tests
//! - An in-memory store with per-account row locks for lock-ordering tests

pub mod duckdb;

#[cfg(test)]
pub mod row_lock_mock;
