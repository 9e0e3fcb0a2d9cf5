//! # Catalog Cache
//!
//! A fixed three-slot cache over the two reserved pages of recently used
//! tables. Each slot pins page 0 (table header: root page id, counters,
//! free list) and page 1 (schema blob) of one `(database, table)` pair.
//!
//! ## Why a Catalog Cache
//!
//! Every tree operation consults page 0 (root page id, free list) and most
//! DML consults the schema. Re-reading those two pages per operation would
//! double the I/O of every statement; caching them with write-back dirty
//! tracking makes header updates (root changes, counter bumps, free-list
//! edits) memory-speed until commit or eviction.
//!
//! ## Slot Anatomy
//!
//! ```text
//! CatalogSlot
//! ├── (db_path, table)   identity; lookup scans all three slots
//! ├── pages[2]           8KiB buffers for page 0 and page 1
//! ├── dirty[2]           per-page write-back flags
//! └── last_access        monotonic access-counter timestamp
//! ```
//!
//! ## Eviction
//!
//! Strict LRU: on a miss with all slots valid, the slot with the smallest
//! `last_access` is flushed (if dirty) and reused. The access counter is a
//! plain monotonically increasing u64 bumped on every hit and load.
//!
//! ## Exclusive Ownership
//!
//! Pages 0 and 1 of any table are read and written only through this
//! cache. Borrowed buffers returned by `page0`/`schema_page` are valid
//! only until the next catalog call; callers must not hold them across
//! operations. Any in-place mutation must set the matching dirty flag
//! before the next yield point; the counter and root-id services here do
//! so internally.
//!
//! ## Thread Safety
//!
//! None required: the transaction queue serializes every caller onto the
//! single worker thread.

use std::path::{Path, PathBuf};

use eyre::Result;
use tracing::{debug, trace};

use crate::config::{
    AUTO_INCREMENT_SLOTS, CATALOG_SLOT_COUNT, INVALID_PAGE_ID, TABLE_FILE_EXTENSION,
};
use crate::errors::{already_exists, integrity_error, invalid_argument, io_error};
use crate::schema::TableSchema;
use crate::storage::{
    init_page, new_page_buf, validate_page, DiskFile, PageBuf, PageHeader, PageKind, PageLevel,
    SchemaPage, SchemaPageMut, TableHeader, TableHeaderMut,
};

/// Path of a table's `.ibd` file under its database directory.
pub fn table_file_path(db_path: &Path, table: &str) -> PathBuf {
    db_path.join(format!("{table}.{TABLE_FILE_EXTENSION}"))
}

struct CatalogSlot {
    db_path: PathBuf,
    table: String,
    pages: [Box<PageBuf>; 2],
    dirty: [bool; 2],
    last_access: u64,
    valid: bool,
}

impl CatalogSlot {
    fn empty() -> Self {
        Self {
            db_path: PathBuf::new(),
            table: String::new(),
            pages: [new_page_buf(), new_page_buf()],
            dirty: [false, false],
            last_access: 0,
            valid: false,
        }
    }

    fn matches(&self, db_path: &Path, table: &str) -> bool {
        self.valid && self.table == table && self.db_path == db_path
    }

    fn reset(&mut self) {
        self.valid = false;
        self.dirty = [false, false];
        self.table.clear();
        self.db_path.clear();
    }
}

pub struct CatalogCache {
    slots: Vec<CatalogSlot>,
    access_counter: u64,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self {
            slots: (0..CATALOG_SLOT_COUNT).map(|_| CatalogSlot::empty()).collect(),
            access_counter: 0,
        }
    }

    fn bump(&mut self, slot: usize) {
        self.access_counter += 1;
        self.slots[slot].last_access = self.access_counter;
    }

    fn find_slot(&self, db_path: &Path, table: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.matches(db_path, table))
    }

    /// Ensures the table's pages 0 and 1 are cached; returns the slot index.
    pub fn load(&mut self, db_path: &Path, table: &str) -> Result<usize> {
        if let Some(idx) = self.find_slot(db_path, table) {
            trace!(table, "catalog hit");
            self.bump(idx);
            return Ok(idx);
        }

        debug!(table, "catalog miss");
        let idx = match self.slots.iter().position(|s| !s.valid) {
            Some(idx) => idx,
            None => self.evict_lru()?,
        };

        let path = table_file_path(db_path, table);
        let mut file = DiskFile::open(&path)?;
        file.read_page(0, &mut self.slots[idx].pages[0])?;
        file.read_page(1, &mut self.slots[idx].pages[1])?;

        Self::check_reserved_pages(&self.slots[idx].pages[0], &self.slots[idx].pages[1], table)?;

        let slot = &mut self.slots[idx];
        slot.db_path = db_path.to_path_buf();
        slot.table = table.to_string();
        slot.dirty = [false, false];
        slot.valid = true;
        self.bump(idx);
        Ok(idx)
    }

    fn check_reserved_pages(page0: &PageBuf, page1: &PageBuf, table: &str) -> Result<()> {
        validate_page(page0, 0)?;
        validate_page(page1, 1)?;

        let header0 = PageHeader::from_bytes(page0)?;
        if header0.kind() != Some(PageKind::Header) {
            return Err(integrity_error(format!(
                "page 0 of table '{table}' is not a header page"
            )));
        }
        let header1 = PageHeader::from_bytes(page1)?;
        if header1.kind() != Some(PageKind::Meta) {
            return Err(integrity_error(format!(
                "page 1 of table '{table}' is not a meta page"
            )));
        }
        Ok(())
    }

    /// Evicts the least-recently-used slot, flushing it first if dirty.
    fn evict_lru(&mut self) -> Result<usize> {
        let idx = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid)
            .min_by_key(|(_, s)| s.last_access)
            .map(|(i, _)| i)
            .expect("evict_lru called with at least one valid slot");

        debug!(table = %self.slots[idx].table, "catalog evict");
        self.write_slot(idx)?;
        self.slots[idx].reset();
        Ok(idx)
    }

    /// Writes the slot's dirty pages back to its table file.
    fn write_slot(&mut self, idx: usize) -> Result<()> {
        let slot = &mut self.slots[idx];
        if !slot.dirty[0] && !slot.dirty[1] {
            return Ok(());
        }

        let path = table_file_path(&slot.db_path, &slot.table);
        let mut file = DiskFile::open(&path)?;
        for page_no in 0..2 {
            if slot.dirty[page_no] {
                file.write_page(page_no as u32, &slot.pages[page_no])?;
                slot.dirty[page_no] = false;
            }
        }
        Ok(())
    }

    /// Borrowed page-0 buffer; valid until the next catalog call.
    pub fn page0(&mut self, db_path: &Path, table: &str) -> Result<&PageBuf> {
        let idx = self.load(db_path, table)?;
        Ok(&self.slots[idx].pages[0])
    }

    /// Mutable page-0 buffer. The caller must `mark_page0_dirty` before its
    /// next yield point; the typed services below do this themselves.
    pub fn page0_mut(&mut self, db_path: &Path, table: &str) -> Result<&mut PageBuf> {
        let idx = self.load(db_path, table)?;
        Ok(&mut self.slots[idx].pages[0])
    }

    /// Borrowed page-1 buffer; valid until the next catalog call.
    pub fn schema_page(&mut self, db_path: &Path, table: &str) -> Result<&PageBuf> {
        let idx = self.load(db_path, table)?;
        Ok(&self.slots[idx].pages[1])
    }

    /// Mutable page-1 buffer. The caller must `mark_schema_dirty` before
    /// its next yield point; `write_schema` does this itself.
    pub fn schema_page_mut(&mut self, db_path: &Path, table: &str) -> Result<&mut PageBuf> {
        let idx = self.load(db_path, table)?;
        Ok(&mut self.slots[idx].pages[1])
    }

    pub fn mark_page0_dirty(&mut self, db_path: &Path, table: &str) {
        if let Some(idx) = self.find_slot(db_path, table) {
            self.slots[idx].dirty[0] = true;
        }
    }

    pub fn mark_schema_dirty(&mut self, db_path: &Path, table: &str) {
        if let Some(idx) = self.find_slot(db_path, table) {
            self.slots[idx].dirty[1] = true;
        }
    }

    /// Builds and persists the two reserved pages of a brand-new table,
    /// then loads them into the cache.
    pub fn create_table_meta(
        &mut self,
        db_path: &Path,
        table: &str,
        schema: &TableSchema,
    ) -> Result<()> {
        let path = table_file_path(db_path, table);
        if path.exists() {
            return Err(already_exists(format!(
                "table file '{}' already exists",
                path.display()
            )));
        }
        std::fs::create_dir_all(db_path).map_err(|e| {
            io_error(format!(
                "failed to create database directory '{}': {e}",
                db_path.display()
            ))
        })?;

        let db_name = db_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());

        let mut page0 = new_page_buf();
        init_page(page0.as_mut(), 0, PageKind::Header, PageLevel::Leaf);
        let mut header = TableHeaderMut::new(page0.as_mut());
        header.set_root_page_id(INVALID_PAGE_ID);
        header.set_table_name(table);
        header.set_db_name(&db_name);
        header.set_next_row_id(1);
        for i in 0..AUTO_INCREMENT_SLOTS {
            header.set_auto_increment(i, 1);
        }

        let mut page1 = new_page_buf();
        init_page(page1.as_mut(), 1, PageKind::Meta, PageLevel::Leaf);
        SchemaPageMut::new(page1.as_mut()).set_schema(&schema.serialize()?)?;

        let mut file = DiskFile::create(&path)?;
        file.write_page(0, &page0)?;
        file.write_page(1, &page1)?;
        file.flush()?;
        drop(file);

        debug!(table, db = %db_name, "created table meta");
        self.load(db_path, table)?;
        Ok(())
    }

    pub fn read_schema(&mut self, db_path: &Path, table: &str) -> Result<TableSchema> {
        let page1 = self.schema_page(db_path, table)?;
        let bytes = SchemaPage::new(page1.as_ref()).schema_bytes()?;
        TableSchema::deserialize(bytes)
    }

    pub fn write_schema(
        &mut self,
        db_path: &Path,
        table: &str,
        schema: &TableSchema,
    ) -> Result<()> {
        let bytes = schema.serialize()?;
        let idx = self.load(db_path, table)?;
        SchemaPageMut::new(self.slots[idx].pages[1].as_mut()).set_schema(&bytes)?;
        self.slots[idx].dirty[1] = true;
        Ok(())
    }

    pub fn root_page_id(&mut self, db_path: &Path, table: &str) -> Result<u32> {
        let page0 = self.page0(db_path, table)?;
        Ok(TableHeader::new(page0.as_ref()).root_page_id())
    }

    pub fn set_root_page_id(&mut self, db_path: &Path, table: &str, root: u32) -> Result<()> {
        let idx = self.load(db_path, table)?;
        TableHeaderMut::new(self.slots[idx].pages[0].as_mut()).set_root_page_id(root);
        self.slots[idx].dirty[0] = true;
        Ok(())
    }

    /// Returns the current row id and advances the counter. Serialized by
    /// the transaction queue; no atomic needed.
    pub fn next_row_id(&mut self, db_path: &Path, table: &str) -> Result<u64> {
        let idx = self.load(db_path, table)?;
        let mut header = TableHeaderMut::new(self.slots[idx].pages[0].as_mut());
        let current = header.next_row_id();
        header.set_next_row_id(current + 1);
        self.slots[idx].dirty[0] = true;
        Ok(current)
    }

    /// Returns the current AUTO_INCREMENT value of one of the eight counter
    /// slots and advances it.
    pub fn next_auto_increment(
        &mut self,
        db_path: &Path,
        table: &str,
        column_index: usize,
    ) -> Result<u64> {
        if column_index >= AUTO_INCREMENT_SLOTS {
            return Err(invalid_argument(format!(
                "AUTO_INCREMENT column index {column_index} out of range (max {})",
                AUTO_INCREMENT_SLOTS - 1
            )));
        }
        let idx = self.load(db_path, table)?;
        let mut header = TableHeaderMut::new(self.slots[idx].pages[0].as_mut());
        let current = header.auto_increment(column_index);
        header.set_auto_increment(column_index, current + 1);
        self.slots[idx].dirty[0] = true;
        Ok(current)
    }

    /// Pops a reusable page from the table's free list, if any.
    pub fn pop_free_page(&mut self, db_path: &Path, table: &str) -> Result<Option<u32>> {
        let idx = self.load(db_path, table)?;
        let popped = TableHeaderMut::new(self.slots[idx].pages[0].as_mut()).pop_free_page();
        if popped.is_some() {
            self.slots[idx].dirty[0] = true;
        }
        Ok(popped)
    }

    /// Pushes a freed page onto the table's free list. A full list leaks
    /// the page rather than failing the delete that freed it.
    pub fn push_free_page(&mut self, db_path: &Path, table: &str, page_id: u32) -> Result<()> {
        let idx = self.load(db_path, table)?;
        let pushed = TableHeaderMut::new(self.slots[idx].pages[0].as_mut()).push_free_page(page_id);
        if pushed {
            self.slots[idx].dirty[0] = true;
        } else {
            debug!(table, page_id, "free list full, leaking page");
        }
        Ok(())
    }

    /// Writes all dirty pages back; clears their dirty flags.
    pub fn flush(&mut self) -> Result<()> {
        for idx in 0..self.slots.len() {
            if self.slots[idx].valid {
                self.write_slot(idx)?;
            }
        }
        Ok(())
    }

    /// Flushes, then invalidates every slot.
    pub fn clear(&mut self) -> Result<()> {
        self.flush()?;
        for slot in &mut self.slots {
            slot.reset();
            slot.last_access = 0;
            slot.pages[0].fill(0);
            slot.pages[1].fill(0);
        }
        Ok(())
    }

    /// Flushes and drops one table's slot, if cached. Used by drop-table
    /// before the file is unlinked.
    pub fn evict(&mut self, db_path: &Path, table: &str) -> Result<()> {
        if let Some(idx) = self.find_slot(db_path, table) {
            self.write_slot(idx)?;
            self.slots[idx].reset();
        }
        Ok(())
    }

    /// Discards one table's slot without flushing. Used when the backing
    /// file is about to be deleted.
    pub fn discard(&mut self, db_path: &Path, table: &str) {
        if let Some(idx) = self.find_slot(db_path, table) {
            self.slots[idx].reset();
        }
    }

    /// `(table, dirty)` pairs of the currently cached slots, for tests and
    /// the shell's cache inspection.
    pub fn cached_tables(&self) -> Vec<(String, bool)> {
        self.slots
            .iter()
            .filter(|s| s.valid)
            .map(|s| (s.table.clone(), s.dirty[0] || s.dirty[1]))
            .collect()
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new()
    }
}
