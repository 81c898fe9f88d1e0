// Transaction writer - validate, check balance, resolve category, persist
//
// These functions do not open their own SQLite transaction; callers run them
// inside one (see `Ledger`) so "check balance, then insert" is a single
// serialized unit and a failure leaves nothing behind.

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::balance;
use crate::categories;
use crate::db::{self, Category, Event, Transaction, TransactionKind};
use crate::error::{LedgerError, Result};

/// Request to record one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category: String,
}

impl NewTransaction {
    pub fn new(title: &str, value: Decimal, kind: TransactionKind, category: &str) -> Self {
        NewTransaction {
            title: title.to_string(),
            value,
            kind,
            category: category.to_string(),
        }
    }

    /// Build a request from raw text fields (as read from an import row).
    pub fn parse(title: &str, kind: &str, value: &str, category: &str) -> Result<Self> {
        let value = value.trim();
        let value = Decimal::from_str(value).map_err(|_| {
            LedgerError::InvalidInput(format!("value '{}' is not a decimal number", value))
        })?;

        Ok(NewTransaction {
            title: title.trim().to_string(),
            value,
            kind: TransactionKind::from_str(kind)?,
            category: category.trim().to_string(),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "title must not be empty".to_string(),
            ));
        }

        if self.value < Decimal::ZERO {
            return Err(LedgerError::InvalidInput(format!(
                "value must not be negative, got {}",
                self.value
            )));
        }

        if self.category.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "category must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Record a transaction, resolving its category by title.
pub fn create(conn: &Connection, request: &NewTransaction) -> Result<Transaction> {
    create_with_categories(conn, request, &HashMap::new())
}

/// Like [`create`], but consults `known` (title -> category) before touching storage.
pub fn create_with_categories(
    conn: &Connection,
    request: &NewTransaction,
    known: &HashMap<String, Category>,
) -> Result<Transaction> {
    request.validate()?;

    let current = balance::compute(conn)?;
    if request.kind == TransactionKind::Outcome && !current.can_afford(request.value) {
        return Err(LedgerError::InsufficientFunds {
            available: current.total,
            requested: request.value,
        });
    }
    // Refuse entries that would make the stored history unsummable
    current.apply(request.kind, request.value)?;

    let category_title = request.category.trim();
    let category = match known.get(category_title) {
        Some(category) => category.clone(),
        None => categories::resolve_one(conn, category_title)?,
    };

    let transaction = Transaction::new(&request.title, request.value, request.kind, category);
    db::insert_transaction(conn, &transaction)?;

    db::insert_event(
        conn,
        &Event::new(
            "transaction_created",
            "transaction",
            &transaction.id,
            serde_json::json!({
                "title": transaction.title,
                "type": transaction.kind.as_str(),
                "value": transaction.value.to_string(),
                "category": transaction.category.title,
            }),
            "transaction_writer",
        ),
    )?;

    Ok(transaction)
}

/// Remove a transaction by id. No balance re-validation is performed.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    let existing =
        db::find_transaction_by_id(conn, id)?.ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

    db::delete_transaction_by_id(conn, id)?;

    db::insert_event(
        conn,
        &Event::new(
            "transaction_deleted",
            "transaction",
            id,
            serde_json::json!({
                "title": existing.title,
                "type": existing.kind.as_str(),
                "value": existing.value.to_string(),
            }),
            "transaction_writer",
        ),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn income(value: i64) -> NewTransaction {
        NewTransaction::new("Salary", Decimal::from(value), TransactionKind::Income, "Work")
    }

    fn outcome(value: i64) -> NewTransaction {
        NewTransaction::new("Rent", Decimal::from(value), TransactionKind::Outcome, "Housing")
    }

    #[test]
    fn test_parse_raw_fields() {
        let request = NewTransaction::parse(" Snack ", "outcome", " 5.50 ", " Food ").unwrap();

        assert_eq!(request.title, "Snack");
        assert_eq!(request.kind, TransactionKind::Outcome);
        assert_eq!(request.value, Decimal::new(550, 2));
        assert_eq!(request.category, "Food");
    }

    #[test]
    fn test_parse_rejects_bad_value_and_type() {
        assert!(matches!(
            NewTransaction::parse("Snack", "outcome", "five", "Food"),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            NewTransaction::parse("Snack", "expense", "5", "Food"),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_income_always_accepted() {
        let conn = test_conn();

        let tx = create(&conn, &income(1000)).unwrap();

        assert_eq!(tx.kind, TransactionKind::Income);
        assert_eq!(tx.category.title, "Work");
        assert_eq!(balance::compute(&conn).unwrap().total, Decimal::from(1000));
    }

    #[test]
    fn test_outcome_over_balance_is_rejected_and_nothing_persisted() {
        let conn = test_conn();
        create(&conn, &income(100)).unwrap();

        let err = create(&conn, &outcome(101)).unwrap_err();
        match err {
            LedgerError::InsufficientFunds { available, requested } => {
                assert_eq!(available, Decimal::from(100));
                assert_eq!(requested, Decimal::from(101));
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }

        assert_eq!(db::count_transactions(&conn).unwrap(), 1);
        // Category resolution runs after the balance check
        assert!(db::find_category_by_title(&conn, "Housing").unwrap().is_none());
    }

    #[test]
    fn test_outcome_equal_to_balance_is_accepted() {
        let conn = test_conn();
        create(&conn, &income(100)).unwrap();
        create(&conn, &outcome(100)).unwrap();

        let balance = balance::compute(&conn).unwrap();
        assert_eq!(balance.total, Decimal::ZERO);
        assert_eq!(balance.outcome, Decimal::from(100));
    }

    #[test]
    fn test_invalid_requests_are_rejected() {
        let conn = test_conn();

        let blank_title = NewTransaction::new("  ", Decimal::ONE, TransactionKind::Income, "Work");
        let negative = NewTransaction::new("Gift", Decimal::from(-5), TransactionKind::Income, "Work");
        let no_category = NewTransaction::new("Gift", Decimal::ONE, TransactionKind::Income, " ");

        for request in [blank_title, negative, no_category] {
            assert!(matches!(create(&conn, &request), Err(LedgerError::InvalidInput(_))));
        }
        assert_eq!(db::count_transactions(&conn).unwrap(), 0);
    }

    #[test]
    fn test_income_that_would_overflow_is_rejected() {
        let conn = test_conn();
        let max = NewTransaction::new("Windfall", Decimal::MAX, TransactionKind::Income, "Work");
        create(&conn, &max).unwrap();

        let err = create(&conn, &income(1)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(db::count_transactions(&conn).unwrap(), 1);
        assert_eq!(balance::compute(&conn).unwrap().total, Decimal::MAX);
    }

    #[test]
    fn test_create_reuses_known_categories() {
        let conn = test_conn();
        let known = categories::index_by_title(categories::resolve_batch(&conn, ["Work"]).unwrap());

        let tx = create_with_categories(&conn, &income(10), &known).unwrap();
        assert_eq!(tx.category_id, known["Work"].id);
    }

    #[test]
    fn test_delete_missing_transaction() {
        let conn = test_conn();
        create(&conn, &income(10)).unwrap();

        let err = delete(&conn, "does-not-exist").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(ref id) if id == "does-not-exist"));
        assert_eq!(db::count_transactions(&conn).unwrap(), 1);
    }

    #[test]
    fn test_delete_records_event() {
        let conn = test_conn();
        let tx = create(&conn, &income(10)).unwrap();

        delete(&conn, &tx.id).unwrap();

        assert_eq!(db::count_transactions(&conn).unwrap(), 0);
        let events = db::get_events_for_entity(&conn, "transaction", &tx.id).unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["transaction_created", "transaction_deleted"]);
    }
}
