//! # Table Facade
//!
//! `EngineCore` is the single-threaded heart of the engine: it owns the
//! catalog cache and the map of open table handles, and implements every
//! table operation the public `Database` facade exposes. All of its
//! methods run on the transaction queue's worker thread; nothing here is
//! synchronized because nothing here is ever concurrent.
//!
//! ## Responsibilities
//!
//! - DDL: create table (pages 0 and 1 via the catalog), drop table
//!   (close handle, evict catalog slot, unlink file)
//! - DML: insert / get / update / delete / scans, delegated to the B+
//!   tree bound to the table's handle and the catalog
//! - Services: schema read/write, row-id and AUTO_INCREMENT counters
//! - Validation: every key/value crosses the argument checks here before
//!   any page is touched
//!
//! `update` is delete-then-insert; the transaction queue makes the pair
//! atomic with respect to other callers, and arguments are validated
//! first so the delete cannot strand a record that the insert then
//! rejects. There is still no rollback of partial disk writes on I/O
//! failure.

mod handle;

use std::path::{Path, PathBuf};

use eyre::Result;
use hashbrown::HashMap;
use tracing::debug;

use crate::catalog::{table_file_path, CatalogCache};
use crate::config::MAX_RECORD_SIZE;
use crate::errors::{invalid_argument, not_found};
use crate::schema::TableSchema;
use crate::storage::slotted::record_size;

pub use handle::TableHandle;

use crate::btree::BTree;

pub struct EngineCore {
    db_path: PathBuf,
    catalog: CatalogCache,
    tables: HashMap<String, TableHandle>,
}

impl EngineCore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            catalog: CatalogCache::new(),
            tables: HashMap::new(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn create_table(&mut self, table: &str, schema: &TableSchema) -> Result<()> {
        if table.is_empty() {
            return Err(invalid_argument("table name must not be empty"));
        }
        self.catalog
            .create_table_meta(&self.db_path, table, schema)?;
        debug!(table, "table created");
        Ok(())
    }

    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.tables.remove(table);
        // The file is about to be unlinked; flushing its catalog pages
        // would only resurrect it.
        self.catalog.discard(&self.db_path, table);

        let path = table_file_path(&self.db_path, table);
        std::fs::remove_file(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                not_found(format!("table '{table}' does not exist"))
            } else {
                crate::errors::io_error(format!(
                    "failed to remove '{}': {e}",
                    path.display()
                ))
            }
        })?;
        debug!(table, "table dropped");
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> bool {
        table_file_path(&self.db_path, table).exists()
    }

    /// Opens the table's handle (loading its catalog pages) without
    /// touching any records. A missing table is not-found.
    pub fn open_table(&mut self, table: &str) -> Result<()> {
        self.ensure_open(table)
    }

    pub fn insert(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        validate_record(key, value)?;
        let (handle, catalog) = self.open_parts(table)?;
        BTree::new(handle, catalog).insert(key, value)
    }

    pub fn get(&mut self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let (handle, catalog) = self.open_parts(table)?;
        BTree::new(handle, catalog).search(key)
    }

    /// Atomic delete-plus-insert under the queue's serialization. Fails
    /// with not-found (and changes nothing) when the key is absent.
    pub fn update(&mut self, table: &str, key: &[u8], new_value: &[u8]) -> Result<()> {
        validate_record(key, new_value)?;
        let (handle, catalog) = self.open_parts(table)?;
        let mut tree = BTree::new(handle, catalog);
        tree.delete(key)?;
        tree.insert(key, new_value)
    }

    pub fn delete(&mut self, table: &str, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        let (handle, catalog) = self.open_parts(table)?;
        BTree::new(handle, catalog).delete(key)
    }

    pub fn scan(
        &mut self,
        table: &str,
        visit: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        let (handle, catalog) = self.open_parts(table)?;
        BTree::new(handle, catalog).scan(None, None, visit)
    }

    pub fn range_scan(
        &mut self,
        table: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        visit: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        let (handle, catalog) = self.open_parts(table)?;
        BTree::new(handle, catalog).scan(start, end, visit)
    }

    pub fn read_schema(&mut self, table: &str) -> Result<TableSchema> {
        self.catalog.read_schema(&self.db_path, table)
    }

    pub fn write_schema(&mut self, table: &str, schema: &TableSchema) -> Result<()> {
        self.catalog.write_schema(&self.db_path, table, schema)
    }

    pub fn next_row_id(&mut self, table: &str) -> Result<u64> {
        self.ensure_open(table)?;
        self.catalog.next_row_id(&self.db_path, table)
    }

    pub fn next_auto_increment(&mut self, table: &str, column_index: usize) -> Result<u64> {
        self.ensure_open(table)?;
        self.catalog
            .next_auto_increment(&self.db_path, table, column_index)
    }

    /// Writes back all dirty catalog pages and syncs open table files.
    pub fn flush(&mut self) -> Result<()> {
        self.catalog.flush()?;
        for handle in self.tables.values_mut() {
            handle.file.flush()?;
        }
        Ok(())
    }

    /// Flushes and forgets all cached state. Open handles are dropped;
    /// the next operation reopens what it needs.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.catalog.clear()?;
        self.tables.clear();
        Ok(())
    }

    /// Tables cached in the catalog right now, with their dirty state.
    pub fn cached_tables(&self) -> Vec<(String, bool)> {
        self.catalog.cached_tables()
    }

    fn ensure_open(&mut self, table: &str) -> Result<()> {
        if !self.tables.contains_key(table) {
            let handle = TableHandle::open(&self.db_path, table, &mut self.catalog)?;
            self.tables.insert(table.to_string(), handle);
        }
        Ok(())
    }

    /// Splits the borrow so the tree can hold the handle and the catalog
    /// at the same time.
    fn open_parts(&mut self, table: &str) -> Result<(&mut TableHandle, &mut CatalogCache)> {
        self.ensure_open(table)?;
        let handle = self
            .tables
            .get_mut(table)
            .expect("handle inserted by ensure_open");
        Ok((handle, &mut self.catalog))
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(invalid_argument("key must not be empty"));
    }
    if key.len() > u16::MAX as usize {
        return Err(invalid_argument(format!(
            "key of {} bytes exceeds the u16 limit",
            key.len()
        )));
    }
    Ok(())
}

fn validate_record(key: &[u8], value: &[u8]) -> Result<()> {
    validate_key(key)?;
    if value.len() > u16::MAX as usize {
        return Err(invalid_argument(format!(
            "value of {} bytes exceeds the u16 limit",
            value.len()
        )));
    }
    let size = record_size(key.len(), value.len());
    if size > MAX_RECORD_SIZE {
        return Err(invalid_argument(format!(
            "record of {size} bytes exceeds the single-page limit of {MAX_RECORD_SIZE}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{error_kind, ErrorKind};
    use crate::schema::ColumnDef;
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchema::new("t", vec![ColumnDef::new("k", "BLOB").primary_key()])
    }

    fn setup() -> (tempfile::TempDir, EngineCore) {
        let dir = tempdir().unwrap();
        let core = EngineCore::new(dir.path().join("db"));
        (dir, core)
    }

    #[test]
    fn create_insert_get_round_trip() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();
        core.insert("t", b"k1", b"v1").unwrap();

        assert_eq!(core.get("t", b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(core.get("t", b"k2").unwrap(), None);
    }

    #[test]
    fn empty_key_is_invalid_argument() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();

        let err = core.insert("t", b"", b"v").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn oversized_record_is_invalid_argument() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();

        let value = vec![0u8; MAX_RECORD_SIZE];
        let err = core.insert("t", b"k", &value).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::InvalidArgument));
    }

    #[test]
    fn update_replaces_value_atomically() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();
        core.insert("t", b"k", b"old").unwrap();

        core.update("t", b"k", b"new").unwrap();
        assert_eq!(core.get("t", b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn update_of_absent_key_is_not_found_and_inserts_nothing() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();

        let err = core.update("t", b"ghost", b"v").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
        assert_eq!(core.get("t", b"ghost").unwrap(), None);
    }

    #[test]
    fn drop_table_removes_file_and_forgets_handle() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();
        core.insert("t", b"k", b"v").unwrap();

        core.drop_table("t").unwrap();
        assert!(!core.table_exists("t"));

        let err = core.get("t", b"k").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn drop_missing_table_is_not_found() {
        let (_dir, mut core) = setup();
        let err = core.drop_table("ghost").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn recreate_after_drop_starts_empty() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();
        core.insert("t", b"k", b"v").unwrap();
        core.drop_table("t").unwrap();

        core.create_table("t", &schema()).unwrap();
        assert_eq!(core.get("t", b"k").unwrap(), None);
    }

    #[test]
    fn state_survives_close_and_reopen() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        {
            let mut core = EngineCore::new(&db);
            core.create_table("t", &schema()).unwrap();
            core.insert("t", b"k", b"v").unwrap();
            core.next_row_id("t").unwrap();
            core.close().unwrap();
        }

        let mut core = EngineCore::new(&db);
        assert_eq!(core.get("t", b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(core.next_row_id("t").unwrap(), 2);
    }

    #[test]
    fn counters_and_schema_services() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();

        assert_eq!(core.next_row_id("t").unwrap(), 1);
        assert_eq!(core.next_row_id("t").unwrap(), 2);
        assert_eq!(core.next_auto_increment("t", 0).unwrap(), 1);

        let read = core.read_schema("t").unwrap();
        assert_eq!(read, schema());
    }

    #[test]
    fn range_scan_collects_bounded_window() {
        let (_dir, mut core) = setup();
        core.create_table("t", &schema()).unwrap();
        for key in [b"a", b"b", b"c", b"d"] {
            core.insert("t", key, b"v").unwrap();
        }

        let mut keys = Vec::new();
        core.range_scan("t", Some(b"b"), Some(b"c"), |k, _| {
            keys.push(k.to_vec());
            true
        })
        .unwrap();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
