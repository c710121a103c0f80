//! idledger core
//!
//! Identity attribute ledger for a secure-messaging engine: versioned
//! profile details, signed device pre-keys, group membership with
//! commit-time notifications, and revocation records.

pub mod config;
pub mod core_identity;
pub mod core_ledger;
pub mod logging;
pub mod metrics;

pub use config::LedgerConfig;
pub use core_ledger::{LedgerError, LedgerResult, LedgerStore, UnitOfWork};
pub use logging::{init_logging, LogLevel};
