//! # Clustered B+ Tree
//!
//! The tree indexes a table's records by key. All records live in leaf
//! pages; internal pages hold routing separators. Every leaf sits at the
//! same depth, and leaves form a doubly linked chain in key order.
//!
//! ## Navigation
//!
//! Descent captures a stack of `(page id, route taken)` pairs. Split
//! propagation and delete rebalancing walk that stack back up instead of
//! consulting the persisted `parent_page` header field, which this
//! implementation writes as 0 and never reads; a cascading split then
//! has no parent pointers to patch.
//!
//! ## Insert
//!
//! ```text
//! 1. Empty tree: allocate the first leaf, write the record, point
//!    page 0's root id at it.
//! 2. Descend to the target leaf; duplicate keys are rejected.
//! 3. If the record fits, insert in place and write the page.
//! 4. Otherwise split: collect the live cells plus the new record,
//!    reinitialize the left page in place (reclaiming dead bytes),
//!    move the upper part to a fresh right sibling, stitch the leaf
//!    chain, and promote the right page's first key to the parent.
//! 5. A full parent splits the same way, promoting its midpoint cell
//!    (not copying it down); a root split allocates a new root.
//! ```
//!
//! ## Delete
//!
//! After removing the record, a non-root page left with fewer than two
//! live cells rebalances against an adjacent sibling under the same
//! parent: the siblings' contents are merged into the lower-keyed page
//! when they fit, otherwise redistributed around a fresh midpoint
//! separator. A merge frees the emptied page onto page 0's free list and
//! deletes the parent's routing cell, cascading the same discipline
//! upward; an internal root left with zero cells is replaced by its only
//! child.
//!
//! ## Crash Behavior
//!
//! There is no write-ahead log. Pages are written children-first, but a
//! crash in the middle of a split or merge can leave the tree
//! inconsistent; callers accept this.

use std::cmp::Ordering;

use eyre::Result;
use smallvec::SmallVec;
use tracing::debug;

use crate::catalog::CatalogCache;
use crate::config::{
    INVALID_PAGE_ID, MAX_TREE_DEPTH, MIN_LIVE_CELLS, PAGE_USABLE_SIZE, SLOT_SIZE,
};
use crate::engine::TableHandle;
use crate::errors::{already_exists, integrity_error, not_found};
use crate::storage::slotted::{compare_keys, record_size};
use crate::storage::{
    init_page, new_page_buf, validate_page, PageBuf, PageHeader, PageKind, PageLevel,
};

use super::internal::{entry_size, ChildRef, Internal, InternalMut};
use super::leaf::{Leaf, LeafMut};

/// Pages visited on the way down, with the routing choice taken at each.
type DescentPath = SmallVec<[(u32, ChildRef); 8]>;

enum RebalanceOutcome {
    Merged,
    Redistributed,
    Unchanged,
}

/// A B+ tree bound to one open table. Mutations go through the table's
/// disk file; root changes and page allocation go through the catalog
/// cache, which owns page 0.
pub struct BTree<'a> {
    handle: &'a mut TableHandle,
    catalog: &'a mut CatalogCache,
}

impl<'a> BTree<'a> {
    pub fn new(handle: &'a mut TableHandle, catalog: &'a mut CatalogCache) -> Self {
        Self { handle, catalog }
    }

    pub fn search(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.handle.root_page == INVALID_PAGE_ID {
            return Ok(None);
        }
        let (_, buf, _) = self.descend(key)?;
        let leaf = Leaf::from_page(&buf[..])?;
        let (found, index) = leaf.find(key)?;
        if found {
            Ok(Some(leaf.value_at(index)?.to_vec()))
        } else {
            Ok(None)
        }
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.handle.root_page == INVALID_PAGE_ID {
            let id = self.allocate_page()?;
            let mut buf = new_page_buf();
            let mut leaf = LeafMut::init(&mut buf[..], id);
            leaf.insert_at(0, key, value);
            self.write_page(id, &buf)?;
            self.set_root(id)?;
            return Ok(());
        }

        let (leaf_id, mut buf, path) = self.descend(key)?;
        let mut leaf = LeafMut::from_page(&mut buf[..])?;
        let (found, index) = leaf.find(key)?;
        if found {
            return Err(already_exists(format!(
                "duplicate key in table '{}'",
                self.handle.table
            )));
        }

        if leaf.can_insert_record(key.len(), value.len()) {
            leaf.insert_at(index, key, value);
            self.write_page(leaf_id, &buf)?;
            return Ok(());
        }

        self.split_leaf(leaf_id, buf, key, value, path)
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if self.handle.root_page == INVALID_PAGE_ID {
            return Err(not_found(format!(
                "key not found in table '{}'",
                self.handle.table
            )));
        }

        let (leaf_id, mut buf, path) = self.descend(key)?;
        let mut leaf = LeafMut::from_page(&mut buf[..])?;
        let (found, index) = leaf.find(key)?;
        if !found {
            return Err(not_found(format!(
                "key not found in table '{}'",
                self.handle.table
            )));
        }

        leaf.delete_at(index)?;
        let remaining = leaf.cell_count();
        self.write_page(leaf_id, &buf)?;

        if leaf_id != self.handle.root_page && remaining < MIN_LIVE_CELLS {
            self.rebalance(leaf_id, path)?;
        }
        Ok(())
    }

    /// Visits `(key, value)` pairs in key order, starting at `start` (or
    /// the leftmost record) and ending after `end` (inclusive) or when the
    /// visitor returns false.
    pub fn scan(
        &mut self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        mut visit: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        if self.handle.root_page == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut buf = match start {
            Some(key) => self.descend(key)?.1,
            None => self.descend_leftmost()?,
        };
        let mut index = match start {
            Some(key) => Leaf::from_page(&buf[..])?.find(key)?.1,
            None => 0,
        };

        loop {
            let next;
            {
                let leaf = Leaf::from_page(&buf[..])?;
                let count = leaf.cell_count();
                while index < count {
                    let key = leaf.key_at(index)?;
                    if let Some(end_key) = end {
                        if compare_keys(key, end_key) == Ordering::Greater {
                            return Ok(());
                        }
                    }
                    if !visit(key, leaf.value_at(index)?) {
                        return Ok(());
                    }
                    index += 1;
                }
                next = leaf.next_leaf();
            }
            if next == 0 {
                return Ok(());
            }
            buf = self.read_page(next)?;
            index = 0;
        }
    }

    fn descend(&mut self, key: &[u8]) -> Result<(u32, Box<PageBuf>, DescentPath)> {
        let mut page_id = self.handle.root_page;
        let mut path = DescentPath::new();

        for _ in 0..MAX_TREE_DEPTH {
            let buf = self.read_page(page_id)?;
            let header = PageHeader::from_bytes(&buf[..])?;
            match header.level() {
                Some(PageLevel::Leaf) => return Ok((page_id, buf, path)),
                Some(PageLevel::Internal) => {
                    let (child, route) = Internal::from_page(&buf[..])?.find_child(key)?;
                    path.push((page_id, route));
                    page_id = child;
                }
                None => {
                    return Err(integrity_error(format!(
                        "page {page_id} has no valid level tag"
                    )))
                }
            }
        }
        Err(integrity_error(format!(
            "descent exceeded {MAX_TREE_DEPTH} levels in table '{}'",
            self.handle.table
        )))
    }

    fn descend_leftmost(&mut self) -> Result<Box<PageBuf>> {
        let mut page_id = self.handle.root_page;
        for _ in 0..MAX_TREE_DEPTH {
            let buf = self.read_page(page_id)?;
            let header = PageHeader::from_bytes(&buf[..])?;
            match header.level() {
                Some(PageLevel::Leaf) => return Ok(buf),
                Some(PageLevel::Internal) => {
                    page_id = Internal::from_page(&buf[..])?.leftmost_child();
                }
                None => {
                    return Err(integrity_error(format!(
                        "page {page_id} has no valid level tag"
                    )))
                }
            }
        }
        Err(integrity_error(format!(
            "descent exceeded {MAX_TREE_DEPTH} levels in table '{}'",
            self.handle.table
        )))
    }

    fn split_leaf(
        &mut self,
        leaf_id: u32,
        mut buf: Box<PageBuf>,
        key: &[u8],
        value: &[u8],
        path: DescentPath,
    ) -> Result<()> {
        let (mut cells, prev, next) = {
            let leaf = Leaf::from_page(&buf[..])?;
            (leaf.cells()?, leaf.prev_leaf(), leaf.next_leaf())
        };
        let pos = cells.partition_point(|(k, _)| compare_keys(k, key) == Ordering::Less);
        cells.insert(pos, (key.to_vec(), value.to_vec()));

        let sizes: Vec<usize> = cells
            .iter()
            .map(|(k, v)| record_size(k.len(), v.len()) + SLOT_SIZE)
            .collect();
        let mid = balanced_split_point(&sizes).ok_or_else(|| {
            integrity_error(format!(
                "leaf {leaf_id} cells cannot be split across two pages"
            ))
        })?;

        let new_id = self.allocate_page()?;
        debug!(
            table = %self.handle.table,
            left = leaf_id,
            right = new_id,
            "splitting leaf"
        );

        {
            let mut left = LeafMut::init(&mut buf[..], leaf_id);
            for (i, (k, v)) in cells[..mid].iter().enumerate() {
                left.insert_at(i, k, v);
            }
            left.set_prev_leaf(prev);
            left.set_next_leaf(new_id);
        }
        self.write_page(leaf_id, &buf)?;

        let mut right_buf = new_page_buf();
        {
            let mut right = LeafMut::init(&mut right_buf[..], new_id);
            for (i, (k, v)) in cells[mid..].iter().enumerate() {
                right.insert_at(i, k, v);
            }
            right.set_prev_leaf(leaf_id);
            right.set_next_leaf(next);
        }
        self.write_page(new_id, &right_buf)?;

        if next != 0 {
            let mut next_buf = self.read_page(next)?;
            LeafMut::from_page(&mut next_buf[..])?.set_prev_leaf(new_id);
            self.write_page(next, &next_buf)?;
        }

        let separator = cells[mid].0.clone();
        self.insert_into_parent(path, separator, new_id)
    }

    /// Propagates a split upward: insert `(separator, right_id)` into the
    /// parent popped off the descent path, splitting the parent in turn if
    /// it is full. Reaching the top of the path means the root split.
    fn insert_into_parent(
        &mut self,
        mut path: DescentPath,
        mut separator: Vec<u8>,
        mut right_id: u32,
    ) -> Result<()> {
        loop {
            let Some((parent_id, _)) = path.pop() else {
                return self.create_new_root(&separator, right_id);
            };

            let mut buf = self.read_page(parent_id)?;
            {
                let mut node = InternalMut::from_page(&mut buf[..])?;
                if node.can_insert_entry(separator.len()) {
                    node.insert_entry(&separator, right_id)?;
                    self.write_page(parent_id, &buf)?;
                    return Ok(());
                }
            }

            let (promoted, new_id) = self.split_internal(parent_id, buf, &separator, right_id)?;
            separator = promoted;
            right_id = new_id;
        }
    }

    /// Splits a full internal page around its midpoint cell, which is
    /// promoted rather than copied down: its key becomes the separator
    /// handed to the parent and its child becomes the right page's
    /// leftmost child.
    fn split_internal(
        &mut self,
        page_id: u32,
        mut buf: Box<PageBuf>,
        new_key: &[u8],
        new_child: u32,
    ) -> Result<(Vec<u8>, u32)> {
        let (mut entries, leftmost) = {
            let node = Internal::from_page(&buf[..])?;
            (node.entries()?, node.leftmost_child())
        };
        let pos = entries.partition_point(|(k, _)| compare_keys(k, new_key) == Ordering::Less);
        entries.insert(pos, (new_key.to_vec(), new_child));

        let sizes: Vec<usize> = entries.iter().map(|(k, _)| entry_size(k.len())).collect();
        let mid = balanced_split_point(&sizes).ok_or_else(|| {
            integrity_error(format!(
                "internal page {page_id} entries cannot be split across two pages"
            ))
        })?;
        let (promoted_key, promoted_child) = entries[mid].clone();

        let new_id = self.allocate_page()?;
        debug!(
            table = %self.handle.table,
            left = page_id,
            right = new_id,
            "splitting internal page"
        );

        {
            let mut left = InternalMut::init(&mut buf[..], page_id, leftmost);
            for (k, c) in &entries[..mid] {
                left.insert_entry(k, *c)?;
            }
        }
        self.write_page(page_id, &buf)?;

        let mut right_buf = new_page_buf();
        {
            let mut right = InternalMut::init(&mut right_buf[..], new_id, promoted_child);
            for (k, c) in &entries[mid + 1..] {
                right.insert_entry(k, *c)?;
            }
        }
        self.write_page(new_id, &right_buf)?;

        Ok((promoted_key, new_id))
    }

    fn create_new_root(&mut self, separator: &[u8], right_id: u32) -> Result<()> {
        let old_root = self.handle.root_page;
        let new_id = self.allocate_page()?;

        let mut buf = new_page_buf();
        {
            let mut root = InternalMut::init(&mut buf[..], new_id, old_root);
            root.insert_entry(separator, right_id)?;
        }
        self.write_page(new_id, &buf)?;
        self.set_root(new_id)
    }

    /// Walks the descent path upward, fixing one underfull page per
    /// iteration by merging or redistributing with an adjacent sibling
    /// under the same parent.
    fn rebalance(&mut self, mut page_id: u32, mut path: DescentPath) -> Result<()> {
        while let Some((parent_id, route)) = path.pop() {
            let mut parent_buf = self.read_page(parent_id)?;
            let children = Internal::from_page(&parent_buf[..])?.children()?;

            let pos = route.position();
            if children.get(pos).copied() != Some(page_id) {
                return Err(integrity_error(format!(
                    "descent route desynchronized at page {parent_id}: expected child {page_id}"
                )));
            }

            // Pair the underfull page with an adjacent sibling; in the
            // middle, lean toward the one with more cells to give
            // redistribution the best chance.
            let (left_pos, right_pos) = if pos == 0 {
                (0, 1)
            } else if pos == children.len() - 1 {
                (pos - 1, pos)
            } else {
                let left_cells = self.live_cell_count(children[pos - 1])?;
                let right_cells = self.live_cell_count(children[pos + 1])?;
                if right_cells >= left_cells {
                    (pos, pos + 1)
                } else {
                    (pos - 1, pos)
                }
            };
            let left_id = children[left_pos];
            let right_id = children[right_pos];
            let sep_index = right_pos - 1;

            let level = {
                let child_buf = self.read_page(left_id)?;
                PageHeader::from_bytes(&child_buf[..])?
                    .level()
                    .ok_or_else(|| integrity_error(format!("page {left_id} has no level tag")))?
            };

            let outcome = match level {
                PageLevel::Leaf => {
                    self.rebalance_leaves(left_id, right_id, &mut parent_buf, sep_index)?
                }
                PageLevel::Internal => {
                    self.rebalance_internals(left_id, right_id, &mut parent_buf, sep_index)?
                }
            };

            match outcome {
                RebalanceOutcome::Unchanged => return Ok(()),
                RebalanceOutcome::Redistributed => {
                    self.write_page(parent_id, &parent_buf)?;
                    return Ok(());
                }
                RebalanceOutcome::Merged => {
                    self.write_page(parent_id, &parent_buf)?;
                    let parent_cells = Internal::from_page(&parent_buf[..])?.cell_count();

                    if path.is_empty() {
                        // The parent is the root. A root with no routing
                        // cells has a single child left; the tree loses a
                        // level.
                        if parent_cells == 0 {
                            let only_child =
                                Internal::from_page(&parent_buf[..])?.leftmost_child();
                            debug!(
                                table = %self.handle.table,
                                old_root = parent_id,
                                new_root = only_child,
                                "collapsing root"
                            );
                            self.set_root(only_child)?;
                            self.free_page(parent_id)?;
                        }
                        return Ok(());
                    }
                    if parent_cells >= MIN_LIVE_CELLS {
                        return Ok(());
                    }
                    page_id = parent_id;
                }
            }
        }
        Ok(())
    }

    fn rebalance_leaves(
        &mut self,
        left_id: u32,
        right_id: u32,
        parent_buf: &mut PageBuf,
        sep_index: usize,
    ) -> Result<RebalanceOutcome> {
        let mut left_buf = self.read_page(left_id)?;
        let right_buf = self.read_page(right_id)?;

        let (mut combined, left_prev) = {
            let left = Leaf::from_page(&left_buf[..])?;
            (left.cells()?, left.prev_leaf())
        };
        let right_next = {
            let right = Leaf::from_page(&right_buf[..])?;
            combined.extend(right.cells()?);
            right.next_leaf()
        };

        let sizes: Vec<usize> = combined
            .iter()
            .map(|(k, v)| record_size(k.len(), v.len()) + SLOT_SIZE)
            .collect();
        let total: usize = sizes.iter().sum();

        if total <= PAGE_USABLE_SIZE {
            // Merge right into left and unlink right from the chain.
            {
                let mut left = LeafMut::init(&mut left_buf[..], left_id);
                for (i, (k, v)) in combined.iter().enumerate() {
                    left.insert_at(i, k, v);
                }
                left.set_prev_leaf(left_prev);
                left.set_next_leaf(right_next);
            }
            self.write_page(left_id, &left_buf)?;

            if right_next != 0 {
                let mut next_buf = self.read_page(right_next)?;
                LeafMut::from_page(&mut next_buf[..])?.set_prev_leaf(left_id);
                self.write_page(right_next, &next_buf)?;
            }

            InternalMut::from_page(&mut parent_buf[..])?.remove_entry(sep_index);
            self.free_page(right_id)?;
            debug!(table = %self.handle.table, left = left_id, right = right_id, "merged leaves");
            return Ok(RebalanceOutcome::Merged);
        }

        // Redistribute when both sides can reach the minimum and the
        // parent can take the replacement separator.
        if combined.len() >= 2 * MIN_LIVE_CELLS {
            if let Some(mid) = balanced_split_point(&sizes) {
                if mid >= MIN_LIVE_CELLS && combined.len() - mid >= MIN_LIVE_CELLS {
                    let new_sep = combined[mid].0.clone();
                    let mut parent = InternalMut::from_page(&mut parent_buf[..])?;
                    if parent.can_swap_separator(new_sep.len()) {
                        parent.remove_entry(sep_index);
                        parent.insert_entry(&new_sep, right_id)?;

                        {
                            let mut left = LeafMut::init(&mut left_buf[..], left_id);
                            for (i, (k, v)) in combined[..mid].iter().enumerate() {
                                left.insert_at(i, k, v);
                            }
                            left.set_prev_leaf(left_prev);
                            left.set_next_leaf(right_id);
                        }
                        self.write_page(left_id, &left_buf)?;

                        let mut new_right = new_page_buf();
                        {
                            let mut right = LeafMut::init(&mut new_right[..], right_id);
                            for (i, (k, v)) in combined[mid..].iter().enumerate() {
                                right.insert_at(i, k, v);
                            }
                            right.set_prev_leaf(left_id);
                            right.set_next_leaf(right_next);
                        }
                        self.write_page(right_id, &new_right)?;

                        debug!(
                            table = %self.handle.table,
                            left = left_id,
                            right = right_id,
                            "redistributed leaves"
                        );
                        return Ok(RebalanceOutcome::Redistributed);
                    }
                }
            }
        }

        // Oversized cells can make both options impossible; the page stays
        // underfull, which the occupancy rule tolerates.
        Ok(RebalanceOutcome::Unchanged)
    }

    fn rebalance_internals(
        &mut self,
        left_id: u32,
        right_id: u32,
        parent_buf: &mut PageBuf,
        sep_index: usize,
    ) -> Result<RebalanceOutcome> {
        let mut left_buf = self.read_page(left_id)?;
        let right_buf = self.read_page(right_id)?;

        let (left_entries, left_leftmost) = {
            let node = Internal::from_page(&left_buf[..])?;
            (node.entries()?, node.leftmost_child())
        };
        let (right_entries, right_leftmost) = {
            let node = Internal::from_page(&right_buf[..])?;
            (node.entries()?, node.leftmost_child())
        };
        let sep_key = Internal::from_page(&parent_buf[..])?
            .key_at(sep_index)?
            .to_vec();

        // The parent separator comes down between the two sides, paired
        // with the right page's leftmost child.
        let mut combined = left_entries;
        combined.push((sep_key, right_leftmost));
        combined.extend(right_entries);

        let sizes: Vec<usize> = combined.iter().map(|(k, _)| entry_size(k.len())).collect();
        let total: usize = sizes.iter().sum();

        if total <= PAGE_USABLE_SIZE {
            {
                let mut left = InternalMut::init(&mut left_buf[..], left_id, left_leftmost);
                for (k, c) in &combined {
                    left.insert_entry(k, *c)?;
                }
            }
            self.write_page(left_id, &left_buf)?;

            InternalMut::from_page(&mut parent_buf[..])?.remove_entry(sep_index);
            self.free_page(right_id)?;
            debug!(
                table = %self.handle.table,
                left = left_id,
                right = right_id,
                "merged internal pages"
            );
            return Ok(RebalanceOutcome::Merged);
        }

        if combined.len() >= 2 * MIN_LIVE_CELLS + 1 {
            if let Some(mid) = balanced_split_point(&sizes) {
                if mid >= MIN_LIVE_CELLS && combined.len() - mid - 1 >= MIN_LIVE_CELLS {
                    let (new_sep, mid_child) = combined[mid].clone();
                    let mut parent = InternalMut::from_page(&mut parent_buf[..])?;
                    if parent.can_swap_separator(new_sep.len()) {
                        parent.remove_entry(sep_index);
                        parent.insert_entry(&new_sep, right_id)?;

                        {
                            let mut left =
                                InternalMut::init(&mut left_buf[..], left_id, left_leftmost);
                            for (k, c) in &combined[..mid] {
                                left.insert_entry(k, *c)?;
                            }
                        }
                        self.write_page(left_id, &left_buf)?;

                        let mut new_right = new_page_buf();
                        {
                            let mut right =
                                InternalMut::init(&mut new_right[..], right_id, mid_child);
                            for (k, c) in &combined[mid + 1..] {
                                right.insert_entry(k, *c)?;
                            }
                        }
                        self.write_page(right_id, &new_right)?;

                        debug!(
                            table = %self.handle.table,
                            left = left_id,
                            right = right_id,
                            "redistributed internal pages"
                        );
                        return Ok(RebalanceOutcome::Redistributed);
                    }
                }
            }
        }

        Ok(RebalanceOutcome::Unchanged)
    }

    fn live_cell_count(&mut self, page_id: u32) -> Result<usize> {
        let buf = self.read_page(page_id)?;
        Ok(PageHeader::from_bytes(&buf[..])?.cell_count() as usize)
    }

    /// Reads and validates a tree page. Pages 0 and 1 belong to the
    /// catalog; the tree touching them is an integrity failure.
    fn read_page(&mut self, page_id: u32) -> Result<Box<PageBuf>> {
        if page_id < 2 || page_id == INVALID_PAGE_ID {
            return Err(integrity_error(format!(
                "tree descent reached reserved page {page_id} in table '{}'",
                self.handle.table
            )));
        }
        let mut buf = new_page_buf();
        self.handle.file.read_page(page_id, &mut buf)?;
        validate_page(&buf[..], page_id)?;
        Ok(buf)
    }

    fn write_page(&mut self, page_id: u32, buf: &PageBuf) -> Result<()> {
        self.handle.file.write_page(page_id, buf)
    }

    /// Pops a page from page 0's free list, or extends the file by one
    /// page. A page allocated by extension is materialized immediately so
    /// the file length stays a whole multiple of the page size.
    fn allocate_page(&mut self) -> Result<u32> {
        if let Some(id) = self
            .catalog
            .pop_free_page(&self.handle.db_path, &self.handle.table)?
        {
            return Ok(id);
        }
        let id = self.handle.file.page_count()?.max(2);
        let mut buf = new_page_buf();
        init_page(&mut buf[..], id, PageKind::Free, PageLevel::Leaf);
        self.write_page(id, &buf)?;
        Ok(id)
    }

    fn free_page(&mut self, page_id: u32) -> Result<()> {
        self.catalog
            .push_free_page(&self.handle.db_path, &self.handle.table, page_id)
    }

    fn set_root(&mut self, page_id: u32) -> Result<()> {
        debug!(table = %self.handle.table, root = page_id, "root changed");
        self.catalog
            .set_root_page_id(&self.handle.db_path, &self.handle.table, page_id)?;
        self.handle.root_page = page_id;
        Ok(())
    }
}

/// Picks a split index for `sizes` (per-cell slotted footprints) starting
/// from the count midpoint and nudging until both halves fit a page.
/// Returns None only if no index in [1, len) works, which cannot happen
/// for admissible record sizes.
fn balanced_split_point(sizes: &[usize]) -> Option<usize> {
    let len = sizes.len();
    if len < 2 {
        return None;
    }
    let total: usize = sizes.iter().sum();
    let mut mid = (len / 2).clamp(1, len - 1);
    let mut left: usize = sizes[..mid].iter().sum();

    while left > PAGE_USABLE_SIZE && mid > 1 {
        mid -= 1;
        left -= sizes[mid];
    }
    while total - left > PAGE_USABLE_SIZE && mid < len - 1 {
        left += sizes[mid];
        mid += 1;
    }

    if left <= PAGE_USABLE_SIZE && total - left <= PAGE_USABLE_SIZE {
        Some(mid)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogCache;
    use crate::errors::{error_kind, ErrorKind};
    use crate::schema::{ColumnDef, TableSchema};
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: PathBuf,
        catalog: CatalogCache,
        handle: TableHandle,
    }

    fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        let mut catalog = CatalogCache::new();
        let schema = TableSchema::new("t", vec![ColumnDef::new("k", "BLOB").primary_key()]);
        catalog.create_table_meta(&db, "t", &schema).unwrap();
        let handle = TableHandle::open(&db, "t", &mut catalog).unwrap();
        Fixture {
            _dir: dir,
            db,
            catalog,
            handle,
        }
    }

    impl Fixture {
        fn tree(&mut self) -> BTree<'_> {
            BTree::new(&mut self.handle, &mut self.catalog)
        }

        fn collect(&mut self) -> Vec<(Vec<u8>, Vec<u8>)> {
            let mut out = Vec::new();
            self.tree()
                .scan(None, None, |k, v| {
                    out.push((k.to_vec(), v.to_vec()));
                    true
                })
                .unwrap();
            out
        }

        /// Leaf page ids in chain order, via the leftmost descent.
        fn leaf_chain(&mut self) -> Vec<u32> {
            let mut tree = self.tree();
            if tree.handle.root_page == INVALID_PAGE_ID {
                return Vec::new();
            }
            let buf = tree.descend_leftmost().unwrap();
            let mut ids = vec![PageHeader::from_bytes(&buf[..]).unwrap().page_id()];
            let mut next = Leaf::from_page(&buf[..]).unwrap().next_leaf();
            while next != 0 {
                let buf = tree.read_page(next).unwrap();
                ids.push(next);
                next = Leaf::from_page(&buf[..]).unwrap().next_leaf();
            }
            ids
        }

        /// Walks the chain backward from its tail; must mirror leaf_chain.
        fn leaf_chain_reversed(&mut self) -> Vec<u32> {
            let forward = self.leaf_chain();
            let Some(&tail) = forward.last() else {
                return Vec::new();
            };
            let mut tree = self.tree();
            let mut ids = vec![tail];
            let mut prev = {
                let buf = tree.read_page(tail).unwrap();
                Leaf::from_page(&buf[..]).unwrap().prev_leaf()
            };
            while prev != 0 {
                let buf = tree.read_page(prev).unwrap();
                ids.push(prev);
                prev = Leaf::from_page(&buf[..]).unwrap().prev_leaf();
            }
            ids
        }
    }

    #[test]
    fn empty_tree_search_and_scan() {
        let mut fx = setup();
        assert!(fx.tree().search(b"k").unwrap().is_none());
        assert!(fx.collect().is_empty());

        let err = fx.tree().delete(b"k").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn first_insert_creates_root_leaf() {
        let mut fx = setup();
        fx.tree().insert(b"hello", b"world").unwrap();

        assert_ne!(fx.handle.root_page, INVALID_PAGE_ID);
        assert_eq!(
            fx.catalog.root_page_id(&fx.db, "t").unwrap(),
            fx.handle.root_page
        );
        assert_eq!(fx.tree().search(b"hello").unwrap(), Some(b"world".to_vec()));
    }

    #[test]
    fn duplicate_insert_is_rejected_and_value_kept() {
        let mut fx = setup();
        fx.tree().insert(b"k", b"1").unwrap();

        let err = fx.tree().insert(b"k", b"2").unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::AlreadyExists));
        assert_eq!(fx.tree().search(b"k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn reverse_insert_order_scans_sorted() {
        let mut fx = setup();
        fx.tree().insert(b"c", b"3").unwrap();
        fx.tree().insert(b"b", b"2").unwrap();
        fx.tree().insert(b"a", b"1").unwrap();

        let rows = fx.collect();
        assert_eq!(
            rows,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn splits_keep_every_key_retrievable() {
        let mut fx = setup();
        let value = vec![0x42u8; 100];
        for i in 0..400 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &value).unwrap();
        }

        assert!(fx.leaf_chain().len() > 1, "expected at least one split");
        for i in 0..400 {
            let key = format!("key{i:05}");
            assert_eq!(
                fx.tree().search(key.as_bytes()).unwrap(),
                Some(value.clone()),
                "missing {key}"
            );
        }

        let rows = fx.collect();
        assert_eq!(rows.len(), 400);
        for pair in rows.windows(2) {
            assert_eq!(compare_keys(&pair[0].0, &pair[1].0), Ordering::Less);
        }
    }

    #[test]
    fn sibling_chain_is_consistent_after_splits() {
        let mut fx = setup();
        for i in (0..300).rev() {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[0u8; 120]).unwrap();
        }

        let forward = fx.leaf_chain();
        let mut backward = fx.leaf_chain_reversed();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn deletes_merge_pages_back() {
        let mut fx = setup();
        for i in 0..400 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[7u8; 100]).unwrap();
        }
        let leaves_before = fx.leaf_chain().len();
        assert!(leaves_before > 2);

        for i in 0..300 {
            let key = format!("key{i:05}");
            fx.tree().delete(key.as_bytes()).unwrap();
        }

        let leaves_after = fx.leaf_chain().len();
        assert!(
            leaves_after < leaves_before,
            "leaf count should shrink: {leaves_before} -> {leaves_after}"
        );

        for i in 300..400 {
            let key = format!("key{i:05}");
            assert_eq!(
                fx.tree().search(key.as_bytes()).unwrap(),
                Some(vec![7u8; 100]),
                "survivor {key} lost"
            );
        }
        assert_eq!(fx.collect().len(), 100);

        let forward = fx.leaf_chain();
        let mut backward = fx.leaf_chain_reversed();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn delete_everything_then_reuse_tree() {
        let mut fx = setup();
        for i in 0..250 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[1u8; 90]).unwrap();
        }
        for i in 0..250 {
            let key = format!("key{i:05}");
            fx.tree().delete(key.as_bytes()).unwrap();
        }

        assert!(fx.collect().is_empty());
        assert!(fx.tree().search(b"key00000").unwrap().is_none());

        fx.tree().insert(b"again", b"works").unwrap();
        assert_eq!(fx.tree().search(b"again").unwrap(), Some(b"works".to_vec()));
    }

    #[test]
    fn root_collapse_reduces_depth() {
        let mut fx = setup();
        for i in 0..400 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[9u8; 100]).unwrap();
        }
        // Delete from the high end until only a handful remain.
        for i in 10..400 {
            let key = format!("key{i:05}");
            fx.tree().delete(key.as_bytes()).unwrap();
        }

        for i in 0..10 {
            let key = format!("key{i:05}");
            assert_eq!(
                fx.tree().search(key.as_bytes()).unwrap(),
                Some(vec![9u8; 100])
            );
        }

        // The root should be a leaf again once ten small records remain.
        let root = fx.handle.root_page;
        let mut tree = fx.tree();
        let buf = tree.read_page(root).unwrap();
        assert_eq!(
            PageHeader::from_bytes(&buf[..]).unwrap().level(),
            Some(PageLevel::Leaf)
        );
    }

    #[test]
    fn large_and_small_values_coexist() {
        let mut fx = setup();
        let large = vec![0xCDu8; 1800];
        fx.tree().insert(b"large_key1", &large).unwrap();
        for i in 0..5 {
            let key = format!("small{i}");
            fx.tree().insert(key.as_bytes(), &[i as u8; 20]).unwrap();
        }

        assert_eq!(fx.tree().search(b"large_key1").unwrap(), Some(large));
        for i in 0..5 {
            let key = format!("small{i}");
            assert_eq!(
                fx.tree().search(key.as_bytes()).unwrap(),
                Some(vec![i as u8; 20])
            );
        }
    }

    #[test]
    fn range_scan_respects_bounds_inclusively() {
        let mut fx = setup();
        for key in [b"a", b"c", b"e", b"g", b"i"] {
            fx.tree().insert(key, b"v").unwrap();
        }

        let mut seen = Vec::new();
        fx.tree()
            .scan(Some(b"c"), Some(b"g"), |k, _| {
                seen.push(k.to_vec());
                true
            })
            .unwrap();
        assert_eq!(seen, vec![b"c".to_vec(), b"e".to_vec(), b"g".to_vec()]);
    }

    #[test]
    fn range_scan_visitor_can_stop_early() {
        let mut fx = setup();
        for i in 0..100 {
            let key = format!("key{i:03}");
            fx.tree().insert(key.as_bytes(), b"v").unwrap();
        }

        let mut seen = 0;
        fx.tree()
            .scan(None, None, |_, _| {
                seen += 1;
                seen < 7
            })
            .unwrap();
        assert_eq!(seen, 7);
    }

    #[test]
    fn freed_pages_are_reused_by_later_splits() {
        let mut fx = setup();
        for i in 0..300 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[3u8; 100]).unwrap();
        }
        for i in 0..300 {
            let key = format!("key{i:05}");
            fx.tree().delete(key.as_bytes()).unwrap();
        }
        let pages_after_drain = fx.handle.file.page_count().unwrap();

        for i in 0..300 {
            let key = format!("key{i:05}");
            fx.tree().insert(key.as_bytes(), &[4u8; 100]).unwrap();
        }
        let pages_after_refill = fx.handle.file.page_count().unwrap();

        assert_eq!(
            pages_after_drain, pages_after_refill,
            "refill should reuse freed pages instead of growing the file"
        );
    }

    #[test]
    fn numeric_suffixes_sort_by_bytes() {
        let mut fx = setup();
        for i in 0..30 {
            let key = format!("key{i}");
            fx.tree().insert(key.as_bytes(), &[0u8; 40]).unwrap();
        }

        let keys: Vec<String> = fx
            .collect()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();

        assert_eq!(keys[0], "key0");
        assert_eq!(keys[1], "key1");
        assert_eq!(keys[2], "key10");
        assert_eq!(keys[3], "key11");
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn balanced_split_point_prefers_count_midpoint() {
        let sizes = vec![10; 8];
        assert_eq!(balanced_split_point(&sizes), Some(4));
    }

    #[test]
    fn balanced_split_point_shifts_for_giant_cells() {
        // One giant cell at the end forces the midpoint left of it.
        let mut sizes = vec![10; 6];
        sizes.push(PAGE_USABLE_SIZE - 20);
        let mid = balanced_split_point(&sizes).unwrap();
        let left: usize = sizes[..mid].iter().sum();
        let right: usize = sizes[mid..].iter().sum();
        assert!(left <= PAGE_USABLE_SIZE && right <= PAGE_USABLE_SIZE);
    }
}
