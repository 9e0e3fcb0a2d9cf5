//! # IbexDB - Paged Single-Node Storage Engine
//!
//! IbexDB is the storage core of a small relational database: it keeps
//! each table in a fixed-size paged `.ibd` file, indexes records with a
//! clustered B+ tree, caches table metadata in a three-slot LRU catalog,
//! and serializes all work through a single-worker transaction queue.
//! The SQL front end (lexer, parser, analyser) and the TCP line server
//! are external collaborators; they consume the byte-level contracts this
//! crate exposes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Database / DatabaseManager (API)   │
//! ├─────────────────────────────────────┤
//! │  Transaction Queue (single worker)  │
//! ├─────────────────────────────────────┤
//! │  Table Facade (EngineCore)          │
//! ├──────────────────┬──────────────────┤
//! │  B+ Tree         │  Catalog Cache   │
//! ├──────────────────┴──────────────────┤
//! │  Slotted Pages / Page Headers       │
//! ├─────────────────────────────────────┤
//! │  Disk File (page-aligned I/O)       │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! One directory per database under a data root, one file per table:
//!
//! ```text
//! data_root/
//! ├── shop/
//! │   ├── users.ibd        # page 0: header, page 1: schema, 2+: tree
//! │   └── orders.ibd
//! └── analytics/
//!     └── events.ibd
//! ```
//!
//! Pages are 8,192 bytes. Page 0 holds the root page id, name arenas,
//! the free-page list and the row-id / AUTO_INCREMENT counters; page 1
//! holds the serialized column schema; every other page is a B+ tree
//! page or free.
//!
//! ## Concurrency Model
//!
//! Any number of threads may call into a `Database`; each call becomes
//! one transaction on the queue and runs alone on the worker thread.
//! There is no WAL and no rollback: a failed transaction's completed
//! page writes stay on disk.
//!
//! ## Module Overview
//!
//! - [`storage`]: pages, slotted record codec, disk file, reserved-page
//!   layouts
//! - [`btree`]: the clustered index
//! - [`catalog`]: the three-slot page-0/page-1 cache
//! - [`txn`]: the serializing transaction queue
//! - [`engine`]: the table facade the public API delegates to
//! - [`schema`]: column definitions and their binary codec
//! - [`errors`]: the typed error kinds of the facade contract

pub mod btree;
pub mod catalog;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod manager;
pub mod schema;
pub mod storage;
pub mod txn;

pub use database::Database;
pub use errors::{error_kind, ErrorKind};
pub use manager::DatabaseManager;
pub use schema::{ColumnDef, TableSchema};
