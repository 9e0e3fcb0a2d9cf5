//! # Page Header and Page Kinds
//!
//! Every 8KB page begins with a 32-byte header describing its role and the
//! state of its slotted area.
//!
//! ## Page Header Layout (32 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     page_id      Page number within this table file
//! 4       2     kind         Free / Header / Meta / Data / Index
//! 6       2     level        Leaf / Internal (tree pages)
//! 8       2     flags        Page flags (unused, reserved)
//! 10      2     cell_count   Number of slots in the directory
//! 12      2     free_start   Records are appended here, growing upward
//! 14      2     free_end     Slot directory base, growing downward
//! 16      4     parent_page  Persisted but never read (descent stack
//!                            navigation makes it non-load-bearing)
//! 20      4     lsn          Reserved for a future WAL; always 0
//! 24      8     reserved     Leaf pages: prev/next sibling ids.
//!                            Internal pages: leftmost child id + unused.
//! ```
//!
//! ## Reserved Area
//!
//! The reserved area doubles as the per-level extra pointer storage:
//!
//! - A **leaf** stores its sibling chain there: previous leaf id at
//!   bytes 24..28 and next leaf id at 28..32, with 0 as the end-of-chain
//!   sentinel (page 0 is the table header, so 0 can never be a leaf).
//! - An **internal** page stores its leftmost child id at bytes 24..28:
//!   the subtree holding every key smaller than cell 0's key.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` derives the zerocopy traits so it can be read in place from
//! a page buffer without deserialization:
//!
//! ```text
//! let header = PageHeader::from_bytes(&page[..32])?;
//! ```
//!
//! All multi-byte fields are little-endian on disk.

use eyre::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::errors::integrity_error;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Free = 0,
    Header = 1,
    Meta = 2,
    Data = 3,
    Index = 4,
}

impl PageKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(PageKind::Free),
            1 => Some(PageKind::Header),
            2 => Some(PageKind::Meta),
            3 => Some(PageKind::Data),
            4 => Some(PageKind::Index),
            _ => None,
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLevel {
    Leaf = 0,
    Internal = 1,
}

impl PageLevel {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(PageLevel::Leaf),
            1 => Some(PageLevel::Internal),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_id: U32,
    kind: U16,
    level: U16,
    flags: U16,
    cell_count: U16,
    free_start: U16,
    free_end: U16,
    parent_page: U32,
    lsn: U32,
    reserved: [U32; 2],
}

const _: () = assert!(size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(integrity_error(format!(
                "buffer too small for PageHeader: {} < {}",
                data.len(),
                PAGE_HEADER_SIZE
            )));
        }
        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| integrity_error(format!("failed to read PageHeader: {e:?}")))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(integrity_error(format!(
                "buffer too small for PageHeader: {} < {}",
                data.len(),
                PAGE_HEADER_SIZE
            )));
        }
        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| integrity_error(format!("failed to read PageHeader: {e:?}")))
    }

    pub fn page_id(&self) -> u32 {
        self.page_id.get()
    }

    pub fn set_page_id(&mut self, id: u32) {
        self.page_id = U32::new(id);
    }

    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_u16(self.kind.get())
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.kind = U16::new(kind as u16);
    }

    pub fn level(&self) -> Option<PageLevel> {
        PageLevel::from_u16(self.level.get())
    }

    pub fn set_level(&mut self, level: PageLevel) {
        self.level = U16::new(level as u16);
    }

    pub fn flags(&self) -> u16 {
        self.flags.get()
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.flags = U16::new(flags);
    }

    pub fn cell_count(&self) -> u16 {
        self.cell_count.get()
    }

    pub fn set_cell_count(&mut self, count: u16) {
        self.cell_count = U16::new(count);
    }

    pub fn free_start(&self) -> u16 {
        self.free_start.get()
    }

    pub fn set_free_start(&mut self, offset: u16) {
        self.free_start = U16::new(offset);
    }

    pub fn free_end(&self) -> u16 {
        self.free_end.get()
    }

    pub fn set_free_end(&mut self, offset: u16) {
        self.free_end = U16::new(offset);
    }

    pub fn free_space(&self) -> u16 {
        self.free_end.get().saturating_sub(self.free_start.get())
    }

    pub fn parent_page(&self) -> u32 {
        self.parent_page.get()
    }

    pub fn set_parent_page(&mut self, id: u32) {
        self.parent_page = U32::new(id);
    }

    pub fn lsn(&self) -> u32 {
        self.lsn.get()
    }

    /// Previous leaf in the sibling chain; 0 at the chain head.
    pub fn prev_leaf(&self) -> u32 {
        self.reserved[0].get()
    }

    pub fn set_prev_leaf(&mut self, id: u32) {
        self.reserved[0] = U32::new(id);
    }

    /// Next leaf in the sibling chain; 0 at the chain tail.
    pub fn next_leaf(&self) -> u32 {
        self.reserved[1].get()
    }

    pub fn set_next_leaf(&mut self, id: u32) {
        self.reserved[1] = U32::new(id);
    }

    /// Leftmost child of an internal page: keys < cell 0's key route here.
    pub fn leftmost_child(&self) -> u32 {
        self.reserved[0].get()
    }

    pub fn set_leftmost_child(&mut self, id: u32) {
        self.reserved[0] = U32::new(id);
    }
}

/// Zeroes the page and writes a fresh header for the given role.
pub fn init_page(data: &mut [u8], page_id: u32, kind: PageKind, level: PageLevel) {
    debug_assert_eq!(data.len(), PAGE_SIZE);
    data.fill(0);

    let header = PageHeader::from_bytes_mut(data).expect("header fits a full page");
    header.set_page_id(page_id);
    header.set_kind(kind);
    header.set_level(level);
    header.set_free_start(PAGE_HEADER_SIZE as u16);
    header.set_free_end(PAGE_SIZE as u16);
}

/// Checks the on-page invariants of a header read from disk. Violations are
/// integrity errors, fatal for the transaction that hit them.
pub fn validate_page(data: &[u8], expected_id: u32) -> Result<()> {
    if data.len() != PAGE_SIZE {
        return Err(integrity_error(format!(
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        )));
    }

    let header = PageHeader::from_bytes(data)?;

    if header.page_id() != expected_id {
        return Err(integrity_error(format!(
            "page id mismatch: header says {}, expected {}",
            header.page_id(),
            expected_id
        )));
    }
    if header.kind().is_none() {
        return Err(integrity_error(format!(
            "unknown page kind {} on page {}",
            header.kind.get(),
            expected_id
        )));
    }
    if (header.free_start() as usize) < PAGE_HEADER_SIZE
        || header.free_end() as usize > PAGE_SIZE
        || header.free_start() > header.free_end()
    {
        return Err(integrity_error(format!(
            "corrupt free space bounds on page {}: free_start={} free_end={}",
            expected_id,
            header.free_start(),
            header.free_end()
        )));
    }
    if header.cell_count() as usize * 2 > PAGE_SIZE - PAGE_HEADER_SIZE {
        return Err(integrity_error(format!(
            "cell count {} too large on page {}",
            header.cell_count(),
            expected_id
        )));
    }

    Ok(())
}
