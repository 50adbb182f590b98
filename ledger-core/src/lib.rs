//! Ledger Core - atomic funds transfers between accounts
//!
//! This crate implements the transactional core of a small banking ledger
//! following hexagonal architecture:
//!
//! - **domain**: Ledger rows and transfer request/result types
//! - **ports**: Trait definitions for the data-access collaborator
//! - **services**: Transaction executor, transfer orchestration, health checks
//! - **adapters**: Concrete implementations (DuckDB)

pub mod domain;
pub mod ports;
pub mod services;
pub mod adapters;
pub mod config;
pub mod migrations;
pub mod log_migrations;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbStore;
use config::Config;
use ports::{LedgerQueries, LedgerStore};
use services::*;

// Re-export commonly used types at crate root
pub use domain::{Account, CreateAccountParams, Entry, Transfer, TransferRequest, TransferResult};
pub use domain::result::{StoreError, TxError};

/// Main context for ledger operations
///
/// Holds the store, configuration and all services for one ledger directory.
pub struct LedgerContext {
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub transfer_service: TransferService,
    pub doctor_service: DoctorService,
    pub logging_service: Arc<LoggingService>,
}

impl LedgerContext {
    /// Open the ledger stored in `ledger_dir`, creating it if needed
    pub fn new(ledger_dir: &Path) -> Result<Self> {
        let config = Config::load(ledger_dir)?;

        let store = Arc::new(DuckDbStore::new(&ledger_dir.join("ledger.duckdb"))?);
        store.ensure_schema()?;

        let logging_service = Arc::new(LoggingService::new(
            ledger_dir,
            env!("CARGO_PKG_VERSION"),
        )?);

        let transfer_service = TransferService::with_config(store.clone(), &config)
            .with_logger(Arc::clone(&logging_service));
        let doctor_service = DoctorService::new(Arc::clone(&store), config.allow_overdraft);

        if let Err(e) = logging_service.log_event("ledger_opened") {
            tracing::warn!(error = %e, "Failed to write event log");
        }
        tracing::info!(path = %ledger_dir.display(), "Ledger opened");

        Ok(Self {
            config,
            store,
            transfer_service,
            doctor_service,
            logging_service,
        })
    }

    /// Open an account, in the configured default currency unless one is given
    pub fn create_account(
        &self,
        owner: &str,
        balance: i64,
        currency: Option<&str>,
    ) -> Result<Account> {
        let params = CreateAccountParams::new(
            owner,
            balance,
            currency.unwrap_or(&self.config.default_currency),
        );
        let account = self.store.connect()?.create_account(&params)?;
        Ok(account)
    }

    /// Move funds between two accounts
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferResult, TxError> {
        self.transfer_service.transfer(request)
    }
}
