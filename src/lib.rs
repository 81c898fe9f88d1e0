// Cashbook - Core Library
// Balance-aware personal ledger with streaming CSV import.
// Exposes all modules for use in the CLI, the API server, and tests.

pub mod error;
pub mod config;
pub mod observability;
pub mod db;
pub mod categories;
pub mod balance;
pub mod writer;
pub mod ledger;
pub mod import;
pub mod upload;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use error::{LedgerError, Result};
pub use config::LedgerConfig;
pub use db::{Category, Event, Transaction, TransactionKind};
pub use balance::Balance;
pub use writer::NewTransaction;
pub use ledger::{Ledger, LedgerSnapshot};
pub use import::{ImportOptions, ImportReport, RejectedRow, SourceFormat};
