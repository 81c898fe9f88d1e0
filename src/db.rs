use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LedgerError, Result};

/// SQLite caps bound parameters per statement; set lookups are chunked below it.
const MAX_SET_PARAMS: usize = 500;

// ============================================================================
// DOMAIN TYPES
// ============================================================================

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money coming in (increases the balance)
    Income,

    /// Money going out (decreases the balance)
    Outcome,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Outcome => "outcome",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    /// Only the exact literals `income` and `outcome` are accepted.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "income" => Ok(TransactionKind::Income),
            "outcome" => Ok(TransactionKind::Outcome),
            other => Err(LedgerError::InvalidInput(format!(
                "transaction type must be 'income' or 'outcome', got '{}'",
                other
            ))),
        }
    }
}

/// Category a transaction is filed under.
///
/// Identity is the UUID; the title is unique and matched exactly (after trimming).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(title: &str) -> Self {
        Category {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            created_at: Utc::now(),
        }
    }
}

/// A single immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub category_id: String,
    pub category: Category,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(title: &str, value: Decimal, kind: TransactionKind, category: Category) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            value,
            kind,
            category_id: category.id.clone(),
            category,
            created_at: Utc::now(),
        }
    }

    /// Signed contribution of this entry to the running total.
    pub fn signed_value(&self) -> Decimal {
        match self.kind {
            TransactionKind::Income => self.value,
            TransactionKind::Outcome => -self.value,
        }
    }
}

/// Event for the audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; concurrent writers wait instead of failing fast
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    // Categories: title is unique so lookup-then-create races collapse onto one row
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_uuid TEXT UNIQUE NOT NULL,
            title TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_uuid TEXT UNIQUE NOT NULL,
            title TEXT NOT NULL,
            value TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('income', 'outcome')),
            category_uuid TEXT NOT NULL REFERENCES categories(category_uuid),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_uuid)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn kind_column(row: &Row, idx: usize) -> rusqlite::Result<TransactionKind> {
    let raw: String = row.get(idx)?;
    TransactionKind::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn map_category_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: timestamp_column(row, 2)?,
    })
}

const SELECT_TRANSACTIONS: &str = "SELECT t.tx_uuid, t.title, t.value, t.kind, t.created_at,
        c.category_uuid, c.title, c.created_at
     FROM transactions t
     JOIN categories c ON c.category_uuid = t.category_uuid";

fn map_transaction_row(row: &Row) -> rusqlite::Result<Transaction> {
    let category = Category {
        id: row.get(5)?,
        title: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
    };

    Ok(Transaction {
        id: row.get(0)?,
        title: row.get(1)?,
        value: decimal_column(row, 2)?,
        kind: kind_column(row, 3)?,
        category_id: category.id.clone(),
        category,
        created_at: timestamp_column(row, 4)?,
    })
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

pub fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (tx_uuid, title, value, kind, category_uuid, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            tx.id,
            tx.title,
            tx.value.to_string(),
            tx.kind.as_str(),
            tx.category_id,
            tx.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// All transactions in insertion order.
pub fn find_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY t.id", SELECT_TRANSACTIONS))?;

    let transactions = stmt
        .query_map([], map_transaction_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(transactions)
}

pub fn find_transaction_by_id(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    let tx = conn
        .query_row(
            &format!("{} WHERE t.tx_uuid = ?1", SELECT_TRANSACTIONS),
            [id],
            map_transaction_row,
        )
        .optional()?;

    Ok(tx)
}

/// Returns the number of rows removed (0 or 1).
pub fn delete_transaction_by_id(conn: &Connection, id: &str) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM transactions WHERE tx_uuid = ?1", [id])?;
    Ok(deleted)
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CATEGORIES
// ============================================================================

pub fn insert_category(conn: &Connection, category: &Category) -> Result<()> {
    conn.execute(
        "INSERT INTO categories (category_uuid, title, created_at) VALUES (?1, ?2, ?3)",
        params![category.id, category.title, category.created_at.to_rfc3339()],
    )?;

    Ok(())
}

pub fn find_category_by_title(conn: &Connection, title: &str) -> Result<Option<Category>> {
    let category = conn
        .query_row(
            "SELECT category_uuid, title, created_at FROM categories WHERE title = ?1",
            [title],
            map_category_row,
        )
        .optional()?;

    Ok(category)
}

/// Find-by-set: every stored category whose title is in `titles`.
pub fn find_categories_by_titles<S: AsRef<str>>(
    conn: &Connection,
    titles: &[S],
) -> Result<Vec<Category>> {
    let mut found = Vec::new();

    for chunk in titles.chunks(MAX_SET_PARAMS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT category_uuid, title, created_at FROM categories WHERE title IN ({})",
            placeholders
        ))?;

        let rows = stmt
            .query_map(params_from_iter(chunk.iter().map(|t| t.as_ref())), map_category_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        found.extend(rows);
    }

    Ok(found)
}

pub fn find_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt =
        conn.prepare("SELECT category_uuid, title, created_at FROM categories ORDER BY title")?;

    let categories = stmt
        .query_map([], map_category_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(categories)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: timestamp_column(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| conversion_error(5, e))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_transaction_kind_parsing() {
        assert_eq!("income".parse::<TransactionKind>().unwrap(), TransactionKind::Income);
        assert_eq!(" outcome ".parse::<TransactionKind>().unwrap(), TransactionKind::Outcome);
        assert!("Income".parse::<TransactionKind>().is_err());
        assert!("transfer".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_transaction_roundtrips_through_storage() {
        let conn = test_conn();

        let category = Category::new("  Work ");
        insert_category(&conn, &category).unwrap();
        assert_eq!(category.title, "Work");

        let tx = Transaction::new("Salary", Decimal::new(123456, 2), TransactionKind::Income, category);
        insert_transaction(&conn, &tx).unwrap();

        let loaded = find_transaction_by_id(&conn, &tx.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Salary");
        assert_eq!(loaded.value, Decimal::new(123456, 2));
        assert_eq!(loaded.kind, TransactionKind::Income);
        assert_eq!(loaded.category.title, "Work");
        assert_eq!(loaded.category_id, loaded.category.id);

        assert_eq!(count_transactions(&conn).unwrap(), 1);
    }

    #[test]
    fn test_find_transactions_keeps_insertion_order() {
        let conn = test_conn();
        let category = Category::new("Misc");
        insert_category(&conn, &category).unwrap();

        for title in ["first", "second", "third"] {
            let tx = Transaction::new(title, Decimal::ONE, TransactionKind::Income, category.clone());
            insert_transaction(&conn, &tx).unwrap();
        }

        let titles: Vec<String> = find_transactions(&conn)
            .unwrap()
            .into_iter()
            .map(|tx| tx.title)
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_delete_transaction_by_id_reports_count() {
        let conn = test_conn();
        let category = Category::new("Misc");
        insert_category(&conn, &category).unwrap();
        let tx = Transaction::new("Coffee", Decimal::ONE, TransactionKind::Income, category);
        insert_transaction(&conn, &tx).unwrap();

        assert_eq!(delete_transaction_by_id(&conn, &tx.id).unwrap(), 1);
        assert_eq!(delete_transaction_by_id(&conn, &tx.id).unwrap(), 0);
        assert!(find_transaction_by_id(&conn, &tx.id).unwrap().is_none());
    }

    #[test]
    fn test_category_title_is_unique() {
        let conn = test_conn();
        insert_category(&conn, &Category::new("Food")).unwrap();

        let err = insert_category(&conn, &Category::new("Food")).unwrap_err();
        match err {
            LedgerError::Storage(rusqlite::Error::SqliteFailure(e, _)) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation)
            }
            other => panic!("expected constraint violation, got {:?}", other),
        }

        // Exact match: a differently-cased title is a different category
        insert_category(&conn, &Category::new("food")).unwrap();
        assert_eq!(find_categories(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_find_categories_by_titles() {
        let conn = test_conn();
        for title in ["Food", "Housing", "Work"] {
            insert_category(&conn, &Category::new(title)).unwrap();
        }

        let found = find_categories_by_titles(&conn, &["Food", "Work", "Travel"]).unwrap();
        let mut titles: Vec<&str> = found.iter().map(|c| c.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Food", "Work"]);

        let empty: [&str; 0] = [];
        assert!(find_categories_by_titles(&conn, &empty).unwrap().is_empty());
    }

    #[test]
    fn test_event_log() {
        let conn = test_conn();

        let event = Event::new(
            "test_event",
            "transaction",
            "test_id_123",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "transaction", "test_id_123").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");
        assert_eq!(events[0].data["test"], "data");
    }

    #[test]
    fn test_transaction_serializes_with_type_and_numeric_value() {
        let tx = Transaction::new(
            "Rent",
            Decimal::new(30050, 2),
            TransactionKind::Outcome,
            Category::new("Housing"),
        );

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "outcome");
        assert_eq!(json["value"], 300.5);
        assert_eq!(json["category"]["title"], "Housing");
        assert_eq!(tx.signed_value(), Decimal::new(-30050, 2));
    }
}
