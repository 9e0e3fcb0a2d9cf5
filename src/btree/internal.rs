//! # B+ Tree Internal Pages
//!
//! Internal pages route searches: an internal page with `n` cells routes
//! `n + 1` children. Each cell pairs a separator key with the child that
//! holds every key greater than or equal to it; the distinguished leftmost
//! child (keys smaller than cell 0's key) lives in the page header's
//! reserved area.
//!
//! ## Cell Layout
//!
//! ```text
//! +-----------+-------------+----------------+
//! | key_len   | child_page  | key bytes      |
//! | (2B)      | (4B)        | (key_len)      |
//! +-----------+-------------+----------------+
//! ```
//!
//! Cells share the slotted-page directory with leaf records but carry
//! their own 6-byte header, so this module owns its key accessor and
//! search instead of reusing the leaf record codec.
//!
//! ## Routing
//!
//! For a search key K over cells with keys k0 < k1 < ... < kn-1:
//!
//! ```text
//! K < k0           -> leftmost child
//! ki <= K < ki+1   -> cell i's child
//! K >= kn-1        -> cell n-1's child
//! ```
//!
//! Keys can be long; nothing here assumes a fixed cell size.

use eyre::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_SIZE, SLOT_SIZE};
use crate::errors::integrity_error;
use crate::storage::slotted::{compare_keys, insert_slot, remove_slot, slot_offset_at};
use crate::storage::{PageHeader, PageKind, PageLevel};

pub const INTERNAL_ENTRY_HEADER_SIZE: usize = 6;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct InternalEntryHeader {
    key_len: U16,
    child_page: U32,
}

const _: () = assert!(size_of::<InternalEntryHeader>() == INTERNAL_ENTRY_HEADER_SIZE);

/// Which routing pointer a descent followed out of an internal page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Leftmost,
    Cell(usize),
}

impl ChildRef {
    /// Position in the page's child order: leftmost is 0, cell i's child
    /// is i + 1.
    pub fn position(self) -> usize {
        match self {
            ChildRef::Leftmost => 0,
            ChildRef::Cell(i) => i + 1,
        }
    }
}

/// Total slotted footprint of one entry (header + key + slot).
pub fn entry_size(key_len: usize) -> usize {
    INTERNAL_ENTRY_HEADER_SIZE + key_len + SLOT_SIZE
}

fn check_internal(data: &[u8]) -> Result<()> {
    let header = PageHeader::from_bytes(data)?;
    if header.kind() != Some(PageKind::Index) || header.level() != Some(PageLevel::Internal) {
        return Err(integrity_error(format!(
            "page {} is not an internal page (kind={:?}, level={:?})",
            header.page_id(),
            header.kind(),
            header.level()
        )));
    }
    Ok(())
}

fn entry_header_at(data: &[u8], offset: usize) -> Result<&InternalEntryHeader> {
    if offset + INTERNAL_ENTRY_HEADER_SIZE > PAGE_SIZE {
        return Err(integrity_error(format!(
            "internal entry at {offset} extends beyond page"
        )));
    }
    InternalEntryHeader::ref_from_bytes(&data[offset..offset + INTERNAL_ENTRY_HEADER_SIZE])
        .map_err(|e| integrity_error(format!("failed to read internal entry: {e:?}")))
}

fn entry_key_at(data: &[u8], index: usize) -> Result<&[u8]> {
    let offset = slot_offset_at(data, index)? as usize;
    let entry = entry_header_at(data, offset)?;
    let start = offset + INTERNAL_ENTRY_HEADER_SIZE;
    let end = start + entry.key_len.get() as usize;
    if end > PAGE_SIZE {
        return Err(integrity_error(format!(
            "internal entry key at {offset} extends beyond page"
        )));
    }
    Ok(&data[start..end])
}

fn entry_child_at(data: &[u8], index: usize) -> Result<u32> {
    let offset = slot_offset_at(data, index)? as usize;
    Ok(entry_header_at(data, offset)?.child_page.get())
}

#[derive(Debug)]
pub struct Internal<'a> {
    data: &'a [u8],
}

impl<'a> Internal<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        check_internal(data)?;
        Ok(Self { data })
    }

    pub fn cell_count(&self) -> usize {
        PageHeader::from_bytes(self.data).expect("validated in from_page").cell_count() as usize
    }

    pub fn leftmost_child(&self) -> u32 {
        PageHeader::from_bytes(self.data).expect("validated in from_page").leftmost_child()
    }

    pub fn key_at(&self, index: usize) -> Result<&'a [u8]> {
        entry_key_at(self.data, index)
    }

    pub fn child_at(&self, index: usize) -> Result<u32> {
        entry_child_at(self.data, index)
    }

    /// Routes a search key to a child page. Binary-searches for the first
    /// cell key strictly greater than the search key; the child to follow
    /// is the previous cell's, or the leftmost pointer when the key sorts
    /// before every cell.
    pub fn find_child(&self, key: &[u8]) -> Result<(u32, ChildRef)> {
        let count = self.cell_count();
        let mut left = 0usize;
        let mut right = count;

        while left < right {
            let mid = left + (right - left) / 2;
            if compare_keys(self.key_at(mid)?, key) == std::cmp::Ordering::Greater {
                right = mid;
            } else {
                left = mid + 1;
            }
        }

        // `left` is now the first cell with key > search key.
        if left == 0 {
            Ok((self.leftmost_child(), ChildRef::Leftmost))
        } else {
            Ok((self.child_at(left - 1)?, ChildRef::Cell(left - 1)))
        }
    }

    /// All `(separator, child)` entries in key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, u32)>> {
        let count = self.cell_count();
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push((self.key_at(i)?.to_vec(), self.child_at(i)?));
        }
        Ok(out)
    }

    /// Child page ids in child order: leftmost first, then one per cell.
    pub fn children(&self) -> Result<Vec<u32>> {
        let count = self.cell_count();
        let mut out = Vec::with_capacity(count + 1);
        out.push(self.leftmost_child());
        for i in 0..count {
            out.push(self.child_at(i)?);
        }
        Ok(out)
    }
}

pub struct InternalMut<'a> {
    data: &'a mut [u8],
}

impl<'a> InternalMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        check_internal(data)?;
        Ok(Self { data })
    }

    /// Reinitializes the buffer as an empty internal page routing
    /// everything to `leftmost_child`.
    pub fn init(data: &'a mut [u8], page_id: u32, leftmost_child: u32) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        crate::storage::init_page(data, page_id, PageKind::Index, PageLevel::Internal);
        PageHeader::from_bytes_mut(data)
            .expect("fresh page has a header")
            .set_leftmost_child(leftmost_child);
        Self { data }
    }

    pub fn as_ref(&self) -> Internal<'_> {
        Internal { data: self.data }
    }

    pub fn cell_count(&self) -> usize {
        self.as_ref().cell_count()
    }

    pub fn can_insert_entry(&self, key_len: usize) -> bool {
        let header = PageHeader::from_bytes(self.data).expect("validated on construction");
        header.free_start() as usize + INTERNAL_ENTRY_HEADER_SIZE + key_len + SLOT_SIZE
            <= header.free_end() as usize
    }

    /// Whether removing one cell and inserting a replacement with a
    /// `key_len`-byte key fits. Removal only returns the slot entry;
    /// the old cell's bytes are not reclaimed until a rewrite.
    pub fn can_swap_separator(&self, key_len: usize) -> bool {
        let header = PageHeader::from_bytes(self.data).expect("validated on construction");
        header.free_start() as usize + INTERNAL_ENTRY_HEADER_SIZE + key_len
            <= header.free_end() as usize
    }

    /// Inserts `(key, child)` at its sorted position. The caller has
    /// checked `can_insert_entry`; a duplicate separator is an integrity
    /// failure because splits promote each separator exactly once.
    pub fn insert_entry(&mut self, key: &[u8], child: u32) -> Result<()> {
        let count = self.cell_count();
        let mut index = count;
        for i in 0..count {
            match compare_keys(entry_key_at(self.data, i)?, key) {
                std::cmp::Ordering::Greater => {
                    index = i;
                    break;
                }
                std::cmp::Ordering::Equal => {
                    return Err(integrity_error(format!(
                        "duplicate separator key on page {}",
                        PageHeader::from_bytes(self.data)?.page_id()
                    )));
                }
                std::cmp::Ordering::Less => {}
            }
        }

        let header = PageHeader::from_bytes_mut(self.data).expect("validated on construction");
        let offset = header.free_start() as usize;
        let entry = InternalEntryHeader {
            key_len: U16::new(key.len() as u16),
            child_page: U32::new(child),
        };
        header.set_free_start((offset + INTERNAL_ENTRY_HEADER_SIZE + key.len()) as u16);
        self.data[offset..offset + INTERNAL_ENTRY_HEADER_SIZE].copy_from_slice(entry.as_bytes());
        self.data[offset + INTERNAL_ENTRY_HEADER_SIZE..offset + INTERNAL_ENTRY_HEADER_SIZE + key.len()]
            .copy_from_slice(key);

        insert_slot(self.data, index, offset as u16);
        Ok(())
    }

    /// Removes the cell at `index` from the directory. The entry bytes
    /// stay behind until the page is rewritten.
    pub fn remove_entry(&mut self, index: usize) {
        remove_slot(self.data, index);
    }
}
