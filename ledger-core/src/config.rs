//! Configuration management
//!
//! Settings live in `settings.json` inside the ledger directory:
//! ```json
//! {
//!   "ledger": {
//!     "allowOverdraft": false,
//!     "defaultCurrency": "USD",
//!     "transferTimeoutMs": 5000
//!   }
//! }
//! ```
//! Unknown sections and fields are preserved when saving.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::Account;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    ledger: LedgerSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerSettings {
    #[serde(default)]
    allow_overdraft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transfer_timeout_ms: Option<u64>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Ledger configuration (simplified view of settings)
#[derive(Debug, Clone)]
pub struct Config {
    /// Let transfers take a source balance below zero
    pub allow_overdraft: bool,
    /// Currency for accounts opened without one
    pub default_currency: String,
    /// Upper bound on a single transfer; expired transfers roll back
    pub transfer_timeout: Option<Duration>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allow_overdraft: false,
            default_currency: "USD".to_string(),
            transfer_timeout: None,
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the ledger directory
    ///
    /// Environment variables override the file (for CI/testing):
    /// - LEDGER_ALLOW_OVERDRAFT
    /// - LEDGER_TRANSFER_TIMEOUT_MS
    pub fn load(ledger_dir: &Path) -> Result<Self> {
        let settings_path = ledger_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)?
        } else {
            SettingsFile::default()
        };

        let allow_overdraft = parse_flag(std::env::var("LEDGER_ALLOW_OVERDRAFT").ok().as_deref())
            .unwrap_or(raw.ledger.allow_overdraft);

        let timeout_ms = std::env::var("LEDGER_TRANSFER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(raw.ledger.transfer_timeout_ms);

        let default_currency = raw
            .ledger
            .default_currency
            .as_deref()
            .map(Account::normalize_currency)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "USD".to_string());

        Ok(Self {
            allow_overdraft,
            default_currency,
            transfer_timeout: timeout_ms.map(Duration::from_millis),
            _raw_settings: raw,
        })
    }

    /// Save config to the ledger directory
    /// Preserves other settings that the ledger doesn't manage
    pub fn save(&self, ledger_dir: &Path) -> Result<()> {
        let settings_path = ledger_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        settings.ledger.allow_overdraft = self.allow_overdraft;
        settings.ledger.default_currency = Some(self.default_currency.clone());
        settings.ledger.transfer_timeout_ms = self.transfer_timeout.map(|t| t.as_millis() as u64);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}

/// Parse a boolean environment flag, `None` when unset or unrecognized
fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value.map(str::trim) {
        Some("true" | "1" | "yes" | "TRUE" | "YES") => Some(true),
        Some("false" | "0" | "no" | "FALSE" | "NO") => Some(false),
        _ => None,
    }
}
