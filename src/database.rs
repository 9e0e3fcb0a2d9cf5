//! # Database Facade
//!
//! The public entry point for one database directory. `Database` owns the
//! engine core behind a mutex and a `TransactionQueue`; every operation
//! is submitted to the queue as one work function, so all catalog, file,
//! and tree mutation happens on the single worker thread, one transaction
//! at a time.
//!
//! ## Ordering Guarantees
//!
//! `execute`d operations complete in FIFO order. A caller that has
//! returned from an operation has observed every earlier-enqueued write;
//! a caller still blocked has observed none of its own transaction's
//! writes. Errors (and panics) inside a transaction surface to exactly
//! the submitting caller; later transactions are unaffected.
//!
//! ## Usage
//!
//! ```ignore
//! use ibexdb::{ColumnDef, Database, TableSchema};
//!
//! let db = Database::open("./data/shop")?;
//! db.create_table("users", TableSchema::new("users", vec![
//!     ColumnDef::new("id", "INT").primary_key().auto_increment(),
//!     ColumnDef::new("email", "VARCHAR(255)").unique(),
//! ]))?;
//!
//! db.insert("users", b"u1", b"alice@example.com")?;
//! let row = db.get("users", b"u1")?;
//! ```
//!
//! Keys and values are opaque byte strings; row encoding is the SQL
//! layer's concern.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;
use parking_lot::Mutex;

use crate::engine::EngineCore;
use crate::errors::io_error;
use crate::schema::TableSchema;
use crate::txn::TransactionQueue;

pub struct Database {
    db_path: PathBuf,
    core: Arc<Mutex<EngineCore>>,
    txn: TransactionQueue,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if needed) the database directory and starts the
    /// transaction worker.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&db_path).map_err(|e| {
            io_error(format!(
                "failed to create database directory '{}': {e}",
                db_path.display()
            ))
        })?;

        Ok(Self {
            core: Arc::new(Mutex::new(EngineCore::new(&db_path))),
            db_path,
            txn: TransactionQueue::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Submits one work function to the serializing queue and blocks for
    /// its outcome.
    fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut EngineCore) -> Result<T> + Send + 'static,
    {
        let core = Arc::clone(&self.core);
        self.txn.execute(move || f(&mut core.lock()))
    }

    pub fn create_table(&self, table: &str, schema: TableSchema) -> Result<()> {
        let table = table.to_string();
        self.run(move |core| core.create_table(&table, &schema))
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let table = table.to_string();
        self.run(move |core| core.drop_table(&table))
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.run(move |core| Ok(core.table_exists(&table)))
    }

    /// Opens a table handle eagerly; a missing table is not-found.
    pub fn open_table(&self, table: &str) -> Result<()> {
        let table = table.to_string();
        self.run(move |core| core.open_table(&table))
    }

    pub fn insert(&self, table: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let (table, key, value) = (table.to_string(), key.into(), value.into());
        self.run(move |core| core.insert(&table, &key, &value))
    }

    pub fn get(&self, table: &str, key: impl Into<Vec<u8>>) -> Result<Option<Vec<u8>>> {
        let (table, key) = (table.to_string(), key.into());
        self.run(move |core| core.get(&table, &key))
    }

    /// Atomic delete-plus-insert in one queued transaction.
    pub fn update(&self, table: &str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let (table, key, value) = (table.to_string(), key.into(), value.into());
        self.run(move |core| core.update(&table, &key, &value))
    }

    pub fn delete(&self, table: &str, key: impl Into<Vec<u8>>) -> Result<()> {
        let (table, key) = (table.to_string(), key.into());
        self.run(move |core| core.delete(&table, &key))
    }

    /// Full scan, collected in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.range_scan(table, None, None)
    }

    /// Bounded scan, collected in key order; both bounds are optional and
    /// the end bound is inclusive.
    pub fn range_scan(
        &self,
        table: &str,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let table = table.to_string();
        self.run(move |core| {
            let mut rows = Vec::new();
            core.range_scan(&table, start.as_deref(), end.as_deref(), |k, v| {
                rows.push((k.to_vec(), v.to_vec()));
                true
            })?;
            Ok(rows)
        })
    }

    /// Streaming scan for callers that want early termination: the
    /// visitor runs on the worker thread and returns false to stop.
    pub fn scan_with(
        &self,
        table: &str,
        visit: impl FnMut(&[u8], &[u8]) -> bool + Send + 'static,
    ) -> Result<()> {
        let table = table.to_string();
        let mut visit = visit;
        self.run(move |core| core.scan(&table, &mut visit))
    }

    pub fn read_schema(&self, table: &str) -> Result<TableSchema> {
        let table = table.to_string();
        self.run(move |core| core.read_schema(&table))
    }

    pub fn next_row_id(&self, table: &str) -> Result<u64> {
        let table = table.to_string();
        self.run(move |core| core.next_row_id(&table))
    }

    pub fn next_auto_increment(&self, table: &str, column_index: usize) -> Result<u64> {
        let table = table.to_string();
        self.run(move |core| core.next_auto_increment(&table, column_index))
    }

    /// Tables currently held by the catalog cache, with dirty state.
    pub fn cached_tables(&self) -> Result<Vec<(String, bool)>> {
        self.run(|core| Ok(core.cached_tables()))
    }

    /// Flushes dirty state to disk without closing.
    pub fn flush(&self) -> Result<()> {
        self.run(|core| core.flush())
    }

    /// Flushes everything and stops the transaction worker. Further
    /// operations fail. Called automatically on drop.
    pub fn close(&self) -> Result<()> {
        let result = self.run(|core| core.close());
        self.txn.shutdown();
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
