// Ledger - single owner of the SQLite connection
//
// Every write runs under the connection mutex inside a BEGIN IMMEDIATE
// transaction. The mutex serializes writers in this process; IMMEDIATE takes
// SQLite's write lock up front, which serializes other connections to the
// same file. Together they make "compute balance, check, insert" atomic.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::balance::{self, Balance};
use crate::categories;
use crate::db::{self, Category, Event, Transaction};
use crate::error::Result;
use crate::import::{self, ImportOptions, ImportReport};
use crate::writer::{self, NewTransaction};

/// Everything the listing endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub transactions: Vec<Transaction>,
    pub balance: Balance,
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) a ledger database on disk.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        db::setup_database(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // Each unit of work is an SQLite transaction, so a panic mid-write
        // rolled back and the connection is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` as one serialized write; any error rolls everything back.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` against one consistent snapshot of storage.
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ========================================================================
    // ROUTING-LAYER OPERATIONS
    // ========================================================================

    pub fn list_all(&self) -> Result<LedgerSnapshot> {
        self.read(|conn| {
            let transactions = db::find_transactions(conn)?;
            let balance = Balance::from_transactions(&transactions)?;
            Ok(LedgerSnapshot {
                transactions,
                balance,
            })
        })
    }

    pub fn balance(&self) -> Result<Balance> {
        self.read(balance::compute)
    }

    pub fn create_one(&self, request: &NewTransaction) -> Result<Transaction> {
        let tx = self.write(|conn| writer::create(conn, request))?;

        tracing::info!(
            id = %tx.id,
            kind = %tx.kind,
            value = %tx.value,
            category = %tx.category.title,
            "transaction created"
        );
        Ok(tx)
    }

    pub fn delete_one(&self, id: &str) -> Result<()> {
        self.write(|conn| writer::delete(conn, id))?;

        tracing::info!(id = %id, "transaction deleted");
        Ok(())
    }

    /// Import a delimited file; the file is removed once the stream was opened.
    pub fn import_file(&self, path: &Path, media_type: &str) -> Result<ImportReport> {
        self.import_file_with(path, media_type, &ImportOptions::default())
    }

    pub fn import_file_with(
        &self,
        path: &Path,
        media_type: &str,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        import::import_file(self, path, media_type, options)
    }

    // ========================================================================
    // CATEGORIES & AUDIT
    // ========================================================================

    pub fn resolve_category(&self, title: &str) -> Result<Category> {
        self.write(|conn| categories::resolve_one(conn, title))
    }

    pub fn resolve_categories<S: AsRef<str>>(&self, titles: &[S]) -> Result<Vec<Category>> {
        self.write(|conn| categories::resolve_batch(conn, titles))
    }

    pub fn categories(&self) -> Result<Vec<Category>> {
        self.read(db::find_categories)
    }

    pub fn record_event(&self, event: &Event) -> Result<()> {
        self.write(|conn| db::insert_event(conn, event))
    }

    pub fn history(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        self.read(|conn| db::get_events_for_entity(conn, entity_type, entity_id))
    }
}
