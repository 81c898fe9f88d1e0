// Error taxonomy for ledger operations
// Every public operation in the library returns `Result<T>` from this module.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed single-record request; nothing was persisted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An outcome would take the balance below zero; nothing was persisted.
    #[error("insufficient funds: balance is {available}, outcome requires {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// Delete target (or lookup target) does not exist.
    #[error("transaction not found: {0}")]
    NotFound(String),

    /// Import source does not declare a delimited-text media type.
    #[error("unsupported import format: {0} (expected text/csv)")]
    UnsupportedFormat(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// True for rejections caused by the caller's data rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidInput(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::UnsupportedFormat(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
