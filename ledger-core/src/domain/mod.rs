//! Core domain entities
//!
//! Ledger rows and the request/result types of a transfer. These are pure
//! data structures with validation logic - no I/O.

mod account;
mod entry;
mod transfer;
pub mod result;

pub use account::{Account, AccountId, CreateAccountParams};
pub use entry::Entry;
pub use transfer::{Transfer, TransferRequest, TransferResult};
