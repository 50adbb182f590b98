//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The transfer core
//! depends only on these traits, not on a concrete database.

mod store;

pub use store::{LedgerQueries, LedgerStore, StoreScope};
