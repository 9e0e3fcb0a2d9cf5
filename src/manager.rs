//! # Database Directory Manager
//!
//! Manages the data root: one subdirectory per database, each holding the
//! `.ibd` files of its tables. The manager tracks which database is
//! currently selected and owns the `Database` engine for it; selecting
//! another database tears the previous engine down (flushing its catalog)
//! and builds a fresh one.
//!
//! ```text
//! data_root/
//! ├── shop/
//! │   ├── users.ibd
//! │   └── orders.ibd
//! └── analytics/
//!     └── events.ibd
//! ```

use std::path::{Path, PathBuf};

use eyre::Result;
use tracing::debug;

use crate::database::Database;
use crate::errors::{already_exists, invalid_argument, io_error, not_found};

pub struct DatabaseManager {
    root: PathBuf,
    current: Option<(String, Database)>,
}

impl DatabaseManager {
    /// Opens the data root, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            io_error(format!(
                "failed to create data root '{}': {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            current: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn db_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(invalid_argument("database name must not be empty"));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(invalid_argument(format!("invalid database name '{name}'")));
        }
        Ok(self.root.join(name))
    }

    pub fn create_database(&mut self, name: &str) -> Result<()> {
        let dir = self.db_dir(name)?;
        if dir.exists() {
            return Err(already_exists(format!("database '{name}' already exists")));
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| io_error(format!("failed to create '{}': {e}", dir.display())))?;
        debug!(name, "database created");
        Ok(())
    }

    /// Removes the database directory and everything in it. Dropping the
    /// selected database deselects it first.
    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        let dir = self.db_dir(name)?;
        if !dir.exists() {
            return Err(not_found(format!("database '{name}' does not exist")));
        }

        if self.current.as_ref().is_some_and(|(cur, _)| cur == name) {
            // Shut the engine down before unlinking its files.
            if let Some((_, db)) = self.current.take() {
                let _ = db.close();
            }
        }

        std::fs::remove_dir_all(&dir)
            .map_err(|e| io_error(format!("failed to remove '{}': {e}", dir.display())))?;
        debug!(name, "database dropped");
        Ok(())
    }

    /// Selects a database, constructing its engine. The previously
    /// selected engine is closed.
    pub fn use_database(&mut self, name: &str) -> Result<&Database> {
        let dir = self.db_dir(name)?;
        if !dir.exists() {
            return Err(not_found(format!("database '{name}' does not exist")));
        }

        if let Some((_, db)) = self.current.take() {
            let _ = db.close();
        }
        let db = Database::open(&dir)?;
        self.current = Some((name.to_string(), db));
        debug!(name, "database selected");
        Ok(&self.current.as_ref().expect("just selected").1)
    }

    /// The selected database's engine, if any.
    pub fn current(&self) -> Option<&Database> {
        self.current.as_ref().map(|(_, db)| db)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_ref().map(|(name, _)| name.as_str())
    }

    /// Names of all databases under the root, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| io_error(format!("failed to read '{}': {e}", self.root.display())))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| io_error(format!("failed to read data root entry: {e}")))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
