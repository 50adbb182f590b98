//! Transaction executor - runs one unit of work inside one store transaction
//!
//! The executor opens a scope, hands it to the unit of work, and then either
//! commits or rolls back. Nothing the unit of work writes is visible to other
//! handles before the commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::result::{TxError, TxResult};
use crate::ports::{LedgerStore, StoreScope};

/// Cooperative cancellation signal for a unit of work
///
/// Clones share state: cancelling one clone cancels all of them. A token
/// created with a timeout also reports cancellation once its deadline passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that is only cancelled explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias of [`CancelToken::new`] for callers that never cancel
    pub fn never() -> Self {
        Self::default()
    }

    /// A token that cancels itself after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// `Err(TxError::Cancelled)` once the token is cancelled
    pub fn check(&self) -> TxResult<()> {
        if self.is_cancelled() {
            Err(TxError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs units of work atomically against a [`LedgerStore`]
///
/// Stateless between calls: each call opens its own scope, and the scope is
/// never shared with another call.
#[derive(Clone)]
pub struct TransactionExecutor {
    store: Arc<dyn LedgerStore>,
}

impl TransactionExecutor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Execute `op` inside a new transaction
    ///
    /// - begin fails: `TxError::TransactionStart`
    /// - `op` fails or `cancel` fires: rollback, then the original error, or
    ///   `TxError::Rollback` carrying both errors if the rollback fails too
    /// - commit fails: `TxError::Commit`, and the value `op` produced is dropped
    ///
    /// `op` is invoked at most once, and only if the token was not already
    /// cancelled when the scope opened.
    pub fn execute_atomic<T, F>(&self, cancel: &CancelToken, op: F) -> TxResult<T>
    where
        F: FnOnce(&dyn StoreScope, &CancelToken) -> TxResult<T>,
    {
        let scope = self.store.begin().map_err(|e| {
            tracing::warn!(error = %e, "Failed to start transaction");
            TxError::TransactionStart(e)
        })?;
        tracing::debug!("Transaction started");

        let outcome = cancel.check().and_then(|()| op(scope.as_ref(), cancel));
        let value = match outcome {
            Ok(value) => value,
            Err(err) => return Err(abort(scope, err)),
        };

        // A deadline that passed while the work ran still wins over commit
        if let Err(err) = cancel.check() {
            return Err(abort(scope, err));
        }

        scope.commit().map_err(|e| {
            tracing::error!(error = %e, "Transaction commit failed");
            TxError::Commit(e)
        })?;
        tracing::debug!("Transaction committed");

        Ok(value)
    }
}

/// Roll back `scope` after `err`, keeping the rollback failure if there is one
fn abort(scope: Box<dyn StoreScope + '_>, err: TxError) -> TxError {
    match scope.rollback() {
        Ok(()) => {
            tracing::warn!(kind = err.kind(), error = %err, "Transaction rolled back");
            err
        }
        Err(rollback) => {
            tracing::error!(
                kind = err.kind(),
                error = %err,
                rollback_error = %rollback,
                "Transaction rollback failed"
            );
            TxError::Rollback {
                source: Box::new(err),
                rollback,
            }
        }
    }
}
