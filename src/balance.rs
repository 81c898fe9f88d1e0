// Balance - derived from the full transaction history on every read

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{self, Transaction, TransactionKind};
use crate::error::{LedgerError, Result};

/// `total == income - outcome` holds for every value produced by this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub outcome: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

impl Balance {
    /// Fold one entry into the balance.
    ///
    /// Fails with `InvalidInput` when any of the three sums would leave the
    /// range `Decimal` can represent.
    pub fn apply(self, kind: TransactionKind, value: Decimal) -> Result<Self> {
        let next = match kind {
            TransactionKind::Income => self
                .income
                .checked_add(value)
                .zip(self.total.checked_add(value))
                .map(|(income, total)| Balance {
                    income,
                    total,
                    ..self
                }),
            TransactionKind::Outcome => self
                .outcome
                .checked_add(value)
                .zip(self.total.checked_sub(value))
                .map(|(outcome, total)| Balance {
                    outcome,
                    total,
                    ..self
                }),
        };

        next.ok_or_else(|| {
            LedgerError::InvalidInput(format!(
                "{} of {} would overflow the balance",
                kind, value
            ))
        })
    }

    pub fn from_transactions<'a, I>(transactions: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        transactions
            .into_iter()
            .try_fold(Balance::default(), |acc, tx| acc.apply(tx.kind, tx.value))
    }

    /// Whether an outcome of `value` keeps the total non-negative.
    pub fn can_afford(&self, value: Decimal) -> bool {
        self.total >= value
    }
}

/// Fetch every stored transaction and fold it into a balance.
pub fn compute(conn: &Connection) -> Result<Balance> {
    let transactions = db::find_transactions(conn)?;
    Balance::from_transactions(&transactions)
}
