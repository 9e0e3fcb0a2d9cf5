//! # Table Handle
//!
//! An open table: its identity, its file descriptor, and the cached root
//! page id. The handle is owned by the engine's open-table map and lives
//! on the worker thread for the duration of a transaction; it holds no
//! page buffers of its own (pages 0 and 1 belong to the catalog cache).

use std::path::{Path, PathBuf};

use eyre::Result;

use crate::catalog::{table_file_path, CatalogCache};
use crate::storage::DiskFile;

#[derive(Debug)]
pub struct TableHandle {
    pub(crate) table: String,
    pub(crate) db_path: PathBuf,
    pub(crate) file: DiskFile,
    /// Root page id as of the last catalog read; 0xFFFFFFFF while the tree
    /// is empty. Updated in lockstep with page 0 whenever the root moves.
    pub(crate) root_page: u32,
}

impl TableHandle {
    /// Opens the table's file and resolves its root page through the
    /// catalog cache. A missing file surfaces as not-found.
    pub fn open(db_path: &Path, table: &str, catalog: &mut CatalogCache) -> Result<Self> {
        let root_page = catalog.root_page_id(db_path, table)?;
        let file = DiskFile::open(table_file_path(db_path, table))?;
        Ok(Self {
            table: table.to_string(),
            db_path: db_path.to_path_buf(),
            file,
            root_page,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }
}
