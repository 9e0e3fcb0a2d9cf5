//! # Configuration Module
//!
//! Central location for all IbexDB constants. Import from here rather than
//! redefining values locally:
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, CATALOG_SLOT_COUNT};
//! ```

mod constants;

pub use constants::{
    AUTO_INCREMENT_SLOTS, CATALOG_SLOT_COUNT, INVALID_PAGE_ID, MAX_RECORD_SIZE, MAX_TREE_DEPTH,
    MIN_LIVE_CELLS, PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_USABLE_SIZE, SLOT_SIZE,
    TABLE_FILE_EXTENSION,
};
