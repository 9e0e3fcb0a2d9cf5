//! # B+ Tree Module
//!
//! The clustered index over a table's records. All data lives in leaf
//! pages; internal pages route by separator key; leaves are doubly linked
//! in key order for range scans.
//!
//! - `leaf`: leaf page views over the slotted record codec
//! - `internal`: internal page views with their own entry codec
//! - `tree`: search, insert with split propagation, delete with
//!   merge/redistribution, range scan

pub mod internal;
pub mod leaf;
mod tree;

pub use internal::{ChildRef, Internal, InternalMut};
pub use leaf::{Leaf, LeafMut};
pub use tree::BTree;
