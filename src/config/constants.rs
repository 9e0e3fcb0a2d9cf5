//! # IbexDB Configuration Constants
//!
//! Centralizes the fixed geometry of the on-disk format and the engine's
//! tuning constants. Constants that depend on each other are co-located and
//! guarded by compile-time assertions so they cannot drift apart.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (32 bytes, fixed)
//!       │
//!       ├─> PAGE_USABLE_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       └─> MAX_RECORD_SIZE (derived: PAGE_USABLE_SIZE - SLOT_SIZE)
//!             A record plus its slot must fit an empty page, so a leaf
//!             split can never produce an empty half.
//!
//! CATALOG_SLOT_COUNT (3)
//!       │
//!       └─> One slot = page 0 + page 1 of one table (16 KiB of buffers).
//!           Eviction is strict LRU by access-counter timestamp.
//!
//! MAX_TREE_DEPTH (100)
//!       Hard failure bound on descent. A healthy tree is far shallower;
//!       hitting this means a corrupt page cycle.
//! ```

/// Size of one on-disk page. Every table file is a whole multiple of this.
pub const PAGE_SIZE: usize = 8192;

/// Size of the page header at offset 0 of every page.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Bytes available to cells and the slot directory on one page.
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// One slot directory entry: a u16 record offset.
pub const SLOT_SIZE: usize = 2;

/// Largest admissible leaf record (header + key + value). The +SLOT_SIZE
/// headroom guarantees the record and its slot fit an empty page together.
pub const MAX_RECORD_SIZE: usize = PAGE_USABLE_SIZE - SLOT_SIZE;

/// Sentinel root page id on page 0: the tree has no pages yet.
pub const INVALID_PAGE_ID: u32 = 0xFFFF_FFFF;

/// Number of catalog cache slots. A deliberate, tested constant.
pub const CATALOG_SLOT_COUNT: usize = 3;

/// Descent depth bound; exceeding it is an integrity failure.
pub const MAX_TREE_DEPTH: usize = 100;

/// A page with fewer live cells than this is underfull and triggers
/// rebalancing (applies to non-root pages at both tree levels).
pub const MIN_LIVE_CELLS: usize = 2;

/// Number of AUTO_INCREMENT counter slots on page 0.
pub const AUTO_INCREMENT_SLOTS: usize = 8;

/// File extension for table files under a database directory.
pub const TABLE_FILE_EXTENSION: &str = "ibd";

const _: () = assert!(PAGE_USABLE_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE);
const _: () = assert!(MAX_RECORD_SIZE == PAGE_USABLE_SIZE - SLOT_SIZE);
const _: () = assert!(CATALOG_SLOT_COUNT >= 1);
