//! # B+ Tree Leaf Pages
//!
//! Leaf pages hold the actual key/value records of a table, stored through
//! the slotted-page codec, and are stitched into a doubly linked sibling
//! chain in key order for range scans.
//!
//! ## Layout
//!
//! A leaf is a slotted page (kind = Data, level = Leaf) whose reserved
//! header area carries the sibling pointers:
//!
//! ```text
//! +--------------------+
//! | PageHeader         |  prev_leaf / next_leaf in the reserved area
//! +--------------------+
//! | leaf records       |  5-byte record header + key + value
//! | ...                |
//! +--------------------+
//! | free space         |
//! +--------------------+
//! | slot directory     |  sorted by key
//! +--------------------+
//! ```
//!
//! `Leaf` borrows a page immutably, `LeafMut` mutably; both validate the
//! page's kind and level on construction so a routing bug cannot silently
//! interpret an internal page as records.

use eyre::Result;

use crate::config::PAGE_SIZE;
use crate::errors::integrity_error;
use crate::storage::slotted::{
    self, binary_search, can_insert, insert_slot, record_size, remove_slot, tombstone_record,
    write_record,
};
use crate::storage::{PageHeader, PageKind, PageLevel};

fn check_leaf(data: &[u8]) -> Result<()> {
    let header = PageHeader::from_bytes(data)?;
    if header.kind() != Some(PageKind::Data) || header.level() != Some(PageLevel::Leaf) {
        return Err(integrity_error(format!(
            "page {} is not a leaf page (kind={:?}, level={:?})",
            header.page_id(),
            header.kind(),
            header.level()
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct Leaf<'a> {
    data: &'a [u8],
}

impl<'a> Leaf<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        check_leaf(data)?;
        Ok(Self { data })
    }

    pub fn cell_count(&self) -> usize {
        PageHeader::from_bytes(self.data).expect("validated in from_page").cell_count() as usize
    }

    pub fn find(&self, key: &[u8]) -> Result<(bool, usize)> {
        binary_search(self.data, key)
    }

    pub fn key_at(&self, index: usize) -> Result<&'a [u8]> {
        slotted::slot_key(self.data, index)
    }

    pub fn value_at(&self, index: usize) -> Result<&'a [u8]> {
        slotted::slot_value(self.data, index)
    }

    pub fn prev_leaf(&self) -> u32 {
        PageHeader::from_bytes(self.data).expect("validated in from_page").prev_leaf()
    }

    pub fn next_leaf(&self) -> u32 {
        PageHeader::from_bytes(self.data).expect("validated in from_page").next_leaf()
    }

    /// All live records in key order. Used when a page is about to be
    /// rewritten (split, merge, redistribution).
    pub fn cells(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let count = self.cell_count();
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push((self.key_at(i)?.to_vec(), self.value_at(i)?.to_vec()));
        }
        Ok(out)
    }
}

pub struct LeafMut<'a> {
    data: &'a mut [u8],
}

impl<'a> LeafMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        check_leaf(data)?;
        Ok(Self { data })
    }

    /// Reinitializes the buffer as an empty leaf. Rewriting a page through
    /// here is what reclaims the dead bytes left by deleted records.
    pub fn init(data: &'a mut [u8], page_id: u32) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        crate::storage::init_page(data, page_id, PageKind::Data, PageLevel::Leaf);
        Self { data }
    }

    pub fn as_ref(&self) -> Leaf<'_> {
        Leaf { data: self.data }
    }

    pub fn cell_count(&self) -> usize {
        self.as_ref().cell_count()
    }

    pub fn find(&self, key: &[u8]) -> Result<(bool, usize)> {
        binary_search(self.data, key)
    }

    pub fn can_insert_record(&self, key_len: usize, value_len: usize) -> bool {
        can_insert(self.data, record_size(key_len, value_len))
    }

    /// Writes the record and its slot at the given directory index. The
    /// caller has already established the index via `find` and checked
    /// `can_insert_record`.
    pub fn insert_at(&mut self, index: usize, key: &[u8], value: &[u8]) {
        let offset = write_record(self.data, key, value);
        insert_slot(self.data, index, offset);
    }

    /// Tombstones the record and removes its slot; both happen inside this
    /// one call, so the tombstone is never observable through a slot.
    pub fn delete_at(&mut self, index: usize) -> Result<()> {
        tombstone_record(self.data, index)?;
        remove_slot(self.data, index);
        Ok(())
    }

    pub fn set_prev_leaf(&mut self, id: u32) {
        PageHeader::from_bytes_mut(self.data)
            .expect("validated on construction")
            .set_prev_leaf(id);
    }

    pub fn set_next_leaf(&mut self, id: u32) {
        PageHeader::from_bytes_mut(self.data)
            .expect("validated on construction")
            .set_next_leaf(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_page, PageKind, PageLevel};

    fn fresh() -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        init_page(&mut page, 2, PageKind::Data, PageLevel::Leaf);
        page
    }

    fn put(leaf: &mut LeafMut<'_>, key: &[u8], value: &[u8]) {
        let (found, index) = leaf.find(key).unwrap();
        assert!(!found);
        leaf.insert_at(index, key, value);
    }

    #[test]
    fn from_page_rejects_internal_pages() {
        let mut page = vec![0u8; PAGE_SIZE];
        init_page(&mut page, 3, PageKind::Index, PageLevel::Internal);

        assert!(Leaf::from_page(&page).is_err());
        assert!(LeafMut::from_page(&mut page).is_err());
    }

    #[test]
    fn inserts_keep_key_order() {
        let mut page = fresh();
        let mut leaf = LeafMut::from_page(&mut page).unwrap();

        put(&mut leaf, b"charlie", b"3");
        put(&mut leaf, b"alpha", b"1");
        put(&mut leaf, b"bravo", b"2");

        let view = leaf.as_ref();
        assert_eq!(view.key_at(0).unwrap(), b"alpha");
        assert_eq!(view.key_at(1).unwrap(), b"bravo");
        assert_eq!(view.key_at(2).unwrap(), b"charlie");
        assert_eq!(view.value_at(1).unwrap(), b"2");
    }

    #[test]
    fn delete_removes_exactly_one_record() {
        let mut page = fresh();
        let mut leaf = LeafMut::from_page(&mut page).unwrap();
        put(&mut leaf, b"a", b"1");
        put(&mut leaf, b"b", b"2");
        put(&mut leaf, b"c", b"3");

        let (found, index) = leaf.find(b"b").unwrap();
        assert!(found);
        leaf.delete_at(index).unwrap();

        let view = leaf.as_ref();
        assert_eq!(view.cell_count(), 2);
        assert_eq!(view.key_at(0).unwrap(), b"a");
        assert_eq!(view.key_at(1).unwrap(), b"c");
        let (found, _) = view.find(b"b").unwrap();
        assert!(!found);
    }

    #[test]
    fn cells_collects_live_records_in_order() {
        let mut page = fresh();
        let mut leaf = LeafMut::from_page(&mut page).unwrap();
        put(&mut leaf, b"b", b"2");
        put(&mut leaf, b"a", b"1");
        put(&mut leaf, b"c", b"3");
        let (_, index) = leaf.find(b"b").unwrap();
        leaf.delete_at(index).unwrap();

        let cells = leaf.as_ref().cells().unwrap();
        assert_eq!(
            cells,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"c".to_vec(), b"3".to_vec())
            ]
        );
    }

    #[test]
    fn sibling_pointers_default_to_chain_ends() {
        let mut page = fresh();
        let mut leaf = LeafMut::init(&mut page, 5);
        assert_eq!(leaf.as_ref().prev_leaf(), 0);
        assert_eq!(leaf.as_ref().next_leaf(), 0);

        leaf.set_prev_leaf(4);
        leaf.set_next_leaf(6);
        assert_eq!(leaf.as_ref().prev_leaf(), 4);
        assert_eq!(leaf.as_ref().next_leaf(), 6);
    }

    #[test]
    fn init_reclaims_dead_space() {
        let mut page = fresh();
        let mut leaf = LeafMut::from_page(&mut page).unwrap();
        put(&mut leaf, b"key", &vec![0xAA; 2000]);
        let (_, index) = leaf.find(b"key").unwrap();
        leaf.delete_at(index).unwrap();

        let reinit = LeafMut::init(&mut page, 2);
        let header = PageHeader::from_bytes(reinit.data).unwrap();
        assert_eq!(header.free_start() as usize, crate::config::PAGE_HEADER_SIZE);
        assert_eq!(header.free_end() as usize, PAGE_SIZE);
    }
}
