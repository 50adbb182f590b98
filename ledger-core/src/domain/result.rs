//! Result and error types for the core library

use thiserror::Error;

use super::AccountId;

/// Failure reported by the data-access layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[source] duckdb::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint violation error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// True if the store rejected the write because of a schema rule
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        if matches!(err, duckdb::Error::QueryReturnedNoRows) {
            return Self::NotFound("query returned no rows".to_string());
        }
        let msg = err.to_string();
        // DuckDB reports CHECK / PRIMARY KEY / FOREIGN KEY failures as "Constraint Error: ..."
        if msg.to_lowercase().contains("constraint error") {
            return Self::Constraint(msg);
        }
        Self::Database(err)
    }
}

/// Store result type
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of an atomic unit of work
///
/// Each variant names the step that failed. The store error that caused it is
/// kept as the error source.
#[derive(Error, Debug)]
pub enum TxError {
    #[error("Failed to start transaction: {0}")]
    TransactionStart(#[source] StoreError),

    #[error("Failed to record transfer: {0}")]
    TransferInsert(#[source] StoreError),

    #[error("Failed to record entry: {0}")]
    EntryInsert(#[source] StoreError),

    #[error("Failed to update account balance: {0}")]
    AccountUpdate(#[source] StoreError),

    #[error("Insufficient funds: account {account_id} would have balance {balance}")]
    InsufficientFunds { account_id: AccountId, balance: i64 },

    #[error("Currency mismatch: {from} cannot be transferred to {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("Transaction cancelled before commit")]
    Cancelled,

    /// The unit of work failed and the rollback that followed failed too
    #[error("{source}; rollback failed: {rollback}")]
    Rollback {
        source: Box<TxError>,
        rollback: StoreError,
    },

    /// Commit failed; the outcome in the store is unknown to the caller
    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] StoreError),
}

impl TxError {
    /// Stable name of the failure, safe to put in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransactionStart(_) => "transaction_start",
            Self::TransferInsert(_) => "transfer_insert",
            Self::EntryInsert(_) => "entry_insert",
            Self::AccountUpdate(_) => "account_update",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::Cancelled => "cancelled",
            Self::Rollback { .. } => "rollback",
            Self::Commit(_) => "commit",
        }
    }

    /// The store error behind this failure, if the store reported one
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::TransactionStart(e)
            | Self::TransferInsert(e)
            | Self::EntryInsert(e)
            | Self::AccountUpdate(e)
            | Self::Commit(e) => Some(e),
            Self::Rollback { source, .. } => source.store_error(),
            Self::InsufficientFunds { .. } | Self::CurrencyMismatch { .. } | Self::Cancelled => None,
        }
    }

    /// The failure that triggered the rollback, looking through a failed rollback
    pub fn original(&self) -> &TxError {
        match self {
            Self::Rollback { source, .. } => source.original(),
            other => other,
        }
    }
}

/// Transaction result type
pub type TxResult<T> = std::result::Result<T, TxError>;
