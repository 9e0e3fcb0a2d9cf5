//! # Page-Granular Disk File
//!
//! One open file descriptor per table. All I/O moves whole 8KB pages at
//! page-aligned offsets.
//!
//! ## Read Semantics
//!
//! Reading past the end of the file is not an error: the missing tail is
//! zero-filled, so a freshly allocated page reads back as a zeroed page.
//! This mirrors how the file grows lazily under `write_page`.
//!
//! ## Write Semantics
//!
//! Writing page `n` to a file shorter than `(n+1) * PAGE_SIZE` first
//! extends the file by writing a single zero byte at the last offset of
//! that page, then writes the full page, then syncs. The file length is
//! therefore always a whole multiple of the page size after any completed
//! `write_page`.
//!
//! ## Failure Model
//!
//! Every open/seek/read/write/sync failure surfaces as an io-error kind
//! and aborts the current transaction. The handle itself stays open and
//! usable, so a caller may retry a transient failure.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::Result;

use crate::config::PAGE_SIZE;
use crate::errors::{io_error, not_found};
use crate::storage::PageBuf;

#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: PathBuf,
}

impl DiskFile {
    /// Opens an existing table file. A missing file is `not-found` (the
    /// caller decides whether that means a missing table); any other
    /// failure is an io-error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    not_found(format!("table file '{}' does not exist", path.display()))
                } else {
                    io_error(format!("failed to open '{}': {e}", path.display()))
                }
            })?;
        Ok(Self { file, path })
    }

    /// Creates a new table file, failing if one already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| io_error(format!("failed to create '{}': {e}", path.display())))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fills `buf` with page `page_id`, zero-padding anything past EOF.
    pub fn read_page(&mut self, page_id: u32, buf: &mut PageBuf) -> Result<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io("seek for read", page_id, e))?;

        let mut total = 0usize;
        while total < PAGE_SIZE {
            let n = self
                .file
                .read(&mut buf[total..])
                .map_err(|e| self.io("read", page_id, e))?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf[total..].fill(0);
        Ok(())
    }

    /// Writes page `page_id`, extending the file first if needed, and syncs.
    pub fn write_page(&mut self, page_id: u32, buf: &PageBuf) -> Result<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let required = offset + PAGE_SIZE as u64;

        let current = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| self.io("seek to end", page_id, e))?;

        if current < required {
            self.file
                .seek(SeekFrom::Start(required - 1))
                .map_err(|e| self.io("seek to extend", page_id, e))?;
            self.file
                .write_all(&[0u8])
                .map_err(|e| self.io("extend", page_id, e))?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io("seek for write", page_id, e))?;
        self.file
            .write_all(buf)
            .map_err(|e| self.io("write", page_id, e))?;
        self.file
            .sync_data()
            .map_err(|e| self.io("sync", page_id, e))?;
        Ok(())
    }

    /// Number of whole pages currently in the file.
    pub fn page_count(&self) -> Result<u32> {
        let len = self
            .file
            .metadata()
            .map_err(|e| io_error(format!("failed to stat '{}': {e}", self.path.display())))?
            .len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    /// Syncs outstanding data to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| io_error(format!("failed to sync '{}': {e}", self.path.display())))
    }

    fn io(&self, op: &str, page_id: u32, e: std::io::Error) -> eyre::Report {
        io_error(format!(
            "failed to {op} page {page_id} of '{}': {e}",
            self.path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{error_kind, ErrorKind};
    use crate::storage::new_page_buf;
    use tempfile::tempdir;

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = DiskFile::open(dir.path().join("absent.ibd")).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ibd");
        DiskFile::create(&path).unwrap();

        let err = DiskFile::create(&path).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Io));
    }

    #[test]
    fn read_past_eof_yields_zeroed_page() {
        let dir = tempdir().unwrap();
        let mut file = DiskFile::create(dir.path().join("t.ibd")).unwrap();

        let mut buf = new_page_buf();
        buf.fill(0xAA);
        file.read_page(9, &mut buf).unwrap();

        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let mut file = DiskFile::create(dir.path().join("t.ibd")).unwrap();

        let mut out = new_page_buf();
        for (i, b) in out.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        file.write_page(3, &out).unwrap();

        let mut back = new_page_buf();
        file.read_page(3, &mut back).unwrap();
        assert_eq!(&out[..], &back[..]);
    }

    #[test]
    fn write_extends_to_whole_page_multiple() {
        let dir = tempdir().unwrap();
        let mut file = DiskFile::create(dir.path().join("t.ibd")).unwrap();

        file.write_page(4, &new_page_buf()).unwrap();

        assert_eq!(file.page_count().unwrap(), 5);
        let len = std::fs::metadata(dir.path().join("t.ibd")).unwrap().len();
        assert_eq!(len % PAGE_SIZE as u64, 0);
    }

    #[test]
    fn interleaved_writes_do_not_disturb_neighbors() {
        let dir = tempdir().unwrap();
        let mut file = DiskFile::create(dir.path().join("t.ibd")).unwrap();

        let mut a = new_page_buf();
        a.fill(1);
        let mut b = new_page_buf();
        b.fill(2);

        file.write_page(0, &a).unwrap();
        file.write_page(2, &b).unwrap();
        file.write_page(1, &a).unwrap();

        let mut back = new_page_buf();
        file.read_page(2, &mut back).unwrap();
        assert!(back.iter().all(|&x| x == 2));
        file.read_page(1, &mut back).unwrap();
        assert!(back.iter().all(|&x| x == 1));
    }
}
