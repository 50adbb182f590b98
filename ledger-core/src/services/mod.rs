//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case.

mod doctor;
pub mod executor;
pub mod logging;
pub mod migration;
mod transfer;

pub use doctor::{CheckResult, DoctorResult, DoctorService};
pub use executor::{CancelToken, TransactionExecutor};
pub use logging::{LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use transfer::TransferService;
