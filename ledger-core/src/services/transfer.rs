//! Transfer service - moves funds between two accounts in one transaction

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::domain::result::{TxError, TxResult};
use crate::domain::{TransferRequest, TransferResult};
use crate::ports::{LedgerStore, StoreScope};

use super::executor::{CancelToken, TransactionExecutor};
use super::logging::{LogEvent, LoggingService};

/// Transfer service
///
/// Each transfer records a transfer row and two offsetting entries, then moves
/// both balances, all inside a single transaction run by the executor.
pub struct TransferService {
    executor: TransactionExecutor,
    allow_overdraft: bool,
    timeout: Option<Duration>,
    logger: Option<Arc<LoggingService>>,
}

impl TransferService {
    /// Create a transfer service with default policy (no overdraft, no timeout)
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            executor: TransactionExecutor::new(store),
            allow_overdraft: false,
            timeout: None,
            logger: None,
        }
    }

    /// Create a transfer service using the policy from `config`
    pub fn with_config(store: Arc<dyn LedgerStore>, config: &Config) -> Self {
        Self {
            executor: TransactionExecutor::new(store),
            allow_overdraft: config.allow_overdraft,
            timeout: config.transfer_timeout,
            logger: None,
        }
    }

    /// Record transfer outcomes in the event log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Allow source balances to go below zero
    pub fn allow_overdraft(mut self, allow: bool) -> Self {
        self.allow_overdraft = allow;
        self
    }

    /// Transfer funds, bounded by the configured timeout if there is one
    pub fn transfer(&self, request: &TransferRequest) -> TxResult<TransferResult> {
        let cancel = match self.timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::never(),
        };
        self.transfer_with_cancel(request, &cancel)
    }

    /// Transfer funds, giving up (and rolling back) once `cancel` fires
    pub fn transfer_with_cancel(
        &self,
        request: &TransferRequest,
        cancel: &CancelToken,
    ) -> TxResult<TransferResult> {
        let result = self
            .executor
            .execute_atomic(cancel, |scope, cancel| self.run(scope, cancel, request));

        match &result {
            Ok(done) => tracing::info!(
                transfer_id = done.transfer.id,
                from_account_id = request.from_account_id,
                to_account_id = request.to_account_id,
                "Transfer committed"
            ),
            Err(e) => tracing::warn!(
                from_account_id = request.from_account_id,
                to_account_id = request.to_account_id,
                kind = e.kind(),
                "Transfer failed"
            ),
        }
        self.record_outcome(&result);

        result
    }

    /// The unit of work: every call goes through `scope`
    fn run(
        &self,
        scope: &dyn StoreScope,
        cancel: &CancelToken,
        request: &TransferRequest,
    ) -> TxResult<TransferResult> {
        let transfer = scope
            .create_transfer(request.from_account_id, request.to_account_id, request.amount)
            .map_err(TxError::TransferInsert)?;

        let from_entry = scope
            .create_entry(request.from_account_id, -request.amount)
            .map_err(TxError::EntryInsert)?;
        let to_entry = scope
            .create_entry(request.to_account_id, request.amount)
            .map_err(TxError::EntryInsert)?;

        cancel.check()?;

        // Lower account id first, whatever the direction of the transfer
        let [(first_id, first_delta), (second_id, second_delta)] = request.lock_order();
        let first = scope
            .add_account_balance(first_id, first_delta)
            .map_err(TxError::AccountUpdate)?;
        let second = scope
            .add_account_balance(second_id, second_delta)
            .map_err(TxError::AccountUpdate)?;

        let (from_account, to_account) = if request.from_account_id == request.to_account_id {
            (second.clone(), second)
        } else if first.id == request.from_account_id {
            (first, second)
        } else {
            (second, first)
        };

        if from_account.currency != to_account.currency {
            return Err(TxError::CurrencyMismatch {
                from: from_account.currency,
                to: to_account.currency,
            });
        }

        if !self.allow_overdraft && from_account.balance < 0 {
            return Err(TxError::InsufficientFunds {
                account_id: from_account.id,
                balance: from_account.balance,
            });
        }

        Ok(TransferResult {
            transfer,
            from_account,
            to_account,
            from_entry,
            to_entry,
        })
    }

    fn record_outcome(&self, result: &TxResult<TransferResult>) {
        let Some(logger) = &self.logger else {
            return;
        };

        let event = match result {
            Ok(done) => LogEvent::new("transfer_committed").with_transfer(done.transfer.id),
            Err(e) => {
                let event = LogEvent::new("transfer_failed").with_error_kind(e.kind());
                match e.store_error() {
                    Some(store_error) => event.with_error(store_error.to_string()),
                    None => event,
                }
            }
        };

        if let Err(e) = logger.log(event) {
            tracing::warn!(error = %e, "Failed to write transfer event log");
        }
    }
}
