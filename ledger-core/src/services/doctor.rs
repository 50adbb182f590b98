//! Doctor service - ledger health checks

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::adapters::duckdb::DuckDbStore;

/// Doctor service for ledger health checks
pub struct DoctorService {
    store: Arc<DuckDbStore>,
    allow_overdraft: bool,
}

impl DoctorService {
    pub fn new(store: Arc<DuckDbStore>, allow_overdraft: bool) -> Self {
        Self {
            store,
            allow_overdraft,
        }
    }

    /// Run all health checks
    pub fn run_checks(&self) -> Result<DoctorResult> {
        let mut checks = HashMap::new();

        // Orphaned entries
        let orphaned_entries = self.store.check_orphaned_entries()?;
        checks.insert(
            "orphaned_entries".to_string(),
            CheckResult {
                status: if orphaned_entries.is_empty() { "pass" } else { "error" }.to_string(),
                message: if orphaned_entries.is_empty() {
                    "No orphaned entries found".to_string()
                } else {
                    format!("{} entry(s) reference missing accounts", orphaned_entries.len())
                },
                details: pair_details(&orphaned_entries, "entry_id", "account_id"),
            },
        );

        // Orphaned transfers
        let orphaned_transfers = self.store.check_orphaned_transfers()?;
        checks.insert(
            "orphaned_transfers".to_string(),
            CheckResult {
                status: if orphaned_transfers.is_empty() { "pass" } else { "error" }.to_string(),
                message: if orphaned_transfers.is_empty() {
                    "No orphaned transfers found".to_string()
                } else {
                    format!("{} transfer(s) reference missing accounts", orphaned_transfers.len())
                },
                details: pair_details(&orphaned_transfers, "transfer_id", "account_id"),
            },
        );

        // Conservation: debits and credits cancel out
        let entry_sum = self.store.sum_entry_amounts()?;
        checks.insert(
            "entry_balance".to_string(),
            CheckResult {
                status: if entry_sum == 0 { "pass" } else { "error" }.to_string(),
                message: if entry_sum == 0 {
                    "Entries sum to zero".to_string()
                } else {
                    format!("Entries sum to {} instead of zero", entry_sum)
                },
                details: if entry_sum == 0 {
                    None
                } else {
                    Some(vec![json!({ "entry_sum": entry_sum })])
                },
            },
        );

        // Every transfer owns exactly two entries
        let entries = self.store.count_entries()?;
        let transfers = self.store.count_transfers()?;
        let paired = entries == transfers * 2;
        checks.insert(
            "entry_pairing".to_string(),
            CheckResult {
                status: if paired { "pass" } else { "error" }.to_string(),
                message: if paired {
                    format!("{} transfer(s) with two entries each", transfers)
                } else {
                    format!("{} entries for {} transfer(s), expected {}", entries, transfers, transfers * 2)
                },
                details: if paired {
                    None
                } else {
                    Some(vec![json!({
                        "entry_count": entries,
                        "transfer_count": transfers
                    })])
                },
            },
        );

        // Negative balances are only expected when overdraft is allowed
        let negative = self.store.check_negative_balances()?;
        let negative_status = match (negative.is_empty(), self.allow_overdraft) {
            (true, _) => "pass",
            (false, true) => "warning",
            (false, false) => "error",
        };
        checks.insert(
            "negative_balances".to_string(),
            CheckResult {
                status: negative_status.to_string(),
                message: if negative.is_empty() {
                    "No accounts below zero".to_string()
                } else {
                    format!("{} account(s) have a negative balance", negative.len())
                },
                details: pair_details(&negative, "account_id", "balance"),
            },
        );

        let passed = checks.values().filter(|c| c.status == "pass").count() as i64;
        let warnings = checks.values().filter(|c| c.status == "warning").count() as i64;
        let errors = checks.values().filter(|c| c.status == "error").count() as i64;

        Ok(DoctorResult {
            checks,
            summary: DoctorSummary {
                passed,
                warnings,
                errors,
            },
        })
    }
}

/// Turn "a:b" rows into JSON objects, `None` when there are no rows
fn pair_details(rows: &[String], first: &str, second: &str) -> Option<Vec<serde_json::Value>> {
    if rows.is_empty() {
        return None;
    }
    Some(
        rows.iter()
            .map(|row| match row.split_once(':') {
                Some((a, b)) => json!({
                    first: a.parse::<i64>().ok(),
                    second: b.parse::<i64>().ok()
                }),
                None => json!({ first: row }),
            })
            .collect(),
    )
}

#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: HashMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}
