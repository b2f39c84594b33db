//! Page Store - positional page I/O on the single host file.
//!
//! The [`PageStore`] handles all direct file operations:
//! - Reading and writing whole pages or byte ranges inside a page
//! - Resizing the host file
//! - Reading and writing the preamble

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::IoStats;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Preamble;

/// The host file, addressed as a flat sequence of fixed-size pages.
///
/// # File Layout
/// ```text
/// ┌──────────────────────┬─────────────────────┬──────────────────────┐
/// │ data pages           │ page-layout table   │ file-mapping table   │
/// │ [0, page_count)      │ page_layout_size    │ file_mapping_size    │
/// └──────────────────────┴─────────────────────┴──────────────────────┘
/// ```
///
/// Page N is located at file offset `N × page_size`. The store itself does
/// not know which region a page belongs to; it only bounds-checks against the
/// total number of pages.
///
/// # Thread Safety
/// `PageStore` is single-threaded. The filesystem lock serializes access.
///
/// # Durability
/// Writes are not synced individually; call [`PageStore::sync`] to force
/// everything to stable storage.
pub struct PageStore {
    file: File,
    path: PathBuf,
    page_size: u32,
    /// Number of pages the host file currently holds.
    total_pages: u32,
    stats: Arc<IoStats>,
}

impl PageStore {
    /// Create (or truncate) a host file with no pages.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, page_size: u32, stats: Arc<IoStats>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            page_size,
            total_pages: 0,
            stats,
        })
    }

    /// Open an existing host file and decode its preamble.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the preamble is not
    /// valid, or the file is shorter than the preamble says.
    pub fn open<P: AsRef<Path>>(path: P, stats: Arc<IoStats>) -> Result<(Self, Preamble)> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut bytes = [0u8; Preamble::SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::NotAFileSystem("file shorter than preamble".into())
            }
            _ => Error::Io(e),
        })?;
        let preamble = Preamble::from_bytes(&bytes)?;

        let expected = preamble.total_pages() as u64 * preamble.page_size as u64;
        let actual = file.metadata()?.len();
        if actual < expected {
            return Err(Error::NotAFileSystem(format!(
                "file holds {actual} bytes, preamble requires {expected}"
            )));
        }

        let store = Self {
            file,
            path: path.as_ref().to_path_buf(),
            page_size: preamble.page_size,
            total_pages: preamble.total_pages(),
            stats,
        };
        Ok((store, preamble))
    }

    fn check_range(&self, page: PageId, offset: u32, len: usize) -> Result<u64> {
        if page.0 >= self.total_pages || offset as usize + len > self.page_size as usize {
            return Err(Error::PageOutOfRange(page));
        }
        Ok(page.0 as u64 * self.page_size as u64 + offset as u64)
    }

    /// Read `buf.len()` bytes starting `offset` bytes into `page`.
    ///
    /// # Errors
    /// Returns `Error::PageOutOfRange` if the range leaves the page or the
    /// file, and an I/O error on a short read.
    pub fn read_at(&mut self, page: PageId, offset: u32, buf: &mut [u8]) -> Result<()> {
        let pos = self.check_range(page, offset, buf.len())?;
        IoStats::bump(&self.stats.uncached_reads);
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Write `data` starting `offset` bytes into `page`.
    ///
    /// # Errors
    /// Returns `Error::PageOutOfRange` if the range leaves the page or the
    /// file, and an I/O error on a short write.
    pub fn write_at(&mut self, page: PageId, offset: u32, data: &[u8]) -> Result<()> {
        let pos = self.check_range(page, offset, data.len())?;
        IoStats::bump(&self.stats.uncached_writes);
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Read a full page.
    pub fn read_page(&mut self, page: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size as usize);
        self.read_at(page, 0, buf)
    }

    /// Write a full page.
    pub fn write_page(&mut self, page: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.page_size as usize);
        self.write_at(page, 0, data)
    }

    /// Copy the content of page `from` over page `to`.
    pub fn copy_page(&mut self, from: PageId, to: PageId) -> Result<()> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.read_page(from, &mut buf)?;
        self.write_page(to, &buf)
    }

    /// Write the preamble to the start of page 0.
    pub fn write_preamble(&mut self, preamble: &Preamble) -> Result<()> {
        self.write_at(PageId::PREAMBLE, 0, &preamble.to_bytes())
    }

    /// Grow or truncate the host file to exactly `total_pages` pages.
    ///
    /// # Errors
    /// Returns an I/O error if the truncate fails or the file does not end
    /// up with the requested length.
    pub fn set_total_pages(&mut self, total_pages: u32) -> Result<()> {
        let len = total_pages as u64 * self.page_size as u64;
        self.file.set_len(len)?;
        if self.file_size()? != len {
            return Err(Error::Io(std::io::Error::other(format!(
                "host file did not resize to {len} bytes"
            ))));
        }
        self.total_pages = total_pages;
        Ok(())
    }

    /// Flush file contents and metadata to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current size of the host file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[inline]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FileSystemConfig;
    use tempfile::tempdir;

    fn create_store(dir: &tempfile::TempDir, total_pages: u32) -> PageStore {
        let path = dir.path().join("test.fs");
        let mut store = PageStore::create(&path, 128, Arc::new(IoStats::new())).unwrap();
        store.set_total_pages(total_pages).unwrap();
        store
    }

    #[test]
    fn test_create_empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fs");

        let store = PageStore::create(&path, 128, Arc::new(IoStats::new())).unwrap();
        assert_eq!(store.total_pages(), 0);
        assert_eq!(store.file_size().unwrap(), 0);
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_write_and_read_range() {
        let dir = tempdir().unwrap();
        let mut store = create_store(&dir, 4);

        store.write_at(PageId::new(2), 10, b"hello").unwrap();

        let mut buf = [0u8; 5];
        store.read_at(PageId::new(2), 10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        let mut page = vec![0u8; 128];
        store.read_page(PageId::new(2), &mut page).unwrap();
        assert_eq!(&page[10..15], b"hello");
        assert_eq!(page[0], 0);
    }

    #[test]
    fn test_out_of_range() {
        let dir = tempdir().unwrap();
        let mut store = create_store(&dir, 4);

        let mut buf = [0u8; 8];
        assert!(matches!(
            store.read_at(PageId::new(4), 0, &mut buf),
            Err(Error::PageOutOfRange(_))
        ));
        assert!(store.write_at(PageId::new(0), 124, &buf).is_err());
    }

    #[test]
    fn test_resize() {
        let dir = tempdir().unwrap();
        let mut store = create_store(&dir, 4);

        store.set_total_pages(10).unwrap();
        assert_eq!(store.file_size().unwrap(), 10 * 128);

        store.set_total_pages(2).unwrap();
        assert_eq!(store.total_pages(), 2);
        assert!(store.write_at(PageId::new(3), 0, b"x").is_err());
    }

    #[test]
    fn test_copy_page() {
        let dir = tempdir().unwrap();
        let mut store = create_store(&dir, 4);

        store.write_at(PageId::new(1), 0, &[7u8; 128]).unwrap();
        store.copy_page(PageId::new(1), PageId::new(3)).unwrap();

        let mut page = vec![0u8; 128];
        store.read_page(PageId::new(3), &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_uncached_counters() {
        let dir = tempdir().unwrap();
        let stats = Arc::new(IoStats::new());
        let path = dir.path().join("test.fs");
        let mut store = PageStore::create(&path, 128, Arc::clone(&stats)).unwrap();
        store.set_total_pages(2).unwrap();

        store.write_at(PageId::new(1), 0, b"abc").unwrap();
        let mut buf = [0u8; 3];
        store.read_at(PageId::new(1), 0, &mut buf).unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.uncached_writes, 1);
        assert_eq!(snapshot.uncached_reads, 1);
    }

    #[test]
    fn test_open_reads_preamble() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fs");
        let preamble = Preamble::new(&FileSystemConfig::new(128, 64));

        {
            let mut store = PageStore::create(&path, 128, Arc::new(IoStats::new())).unwrap();
            store.set_total_pages(preamble.total_pages()).unwrap();
            store.write_preamble(&preamble).unwrap();
        }

        let (store, decoded) = PageStore::open(&path, Arc::new(IoStats::new())).unwrap();
        assert_eq!(decoded, preamble);
        assert_eq!(store.total_pages(), preamble.total_pages());
        assert_eq!(store.page_size(), 128);
    }

    #[test]
    fn test_open_rejects_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.fs");
        let preamble = Preamble::new(&FileSystemConfig::new(128, 64));

        {
            let mut store = PageStore::create(&path, 128, Arc::new(IoStats::new())).unwrap();
            store.set_total_pages(1).unwrap();
            store.write_preamble(&preamble).unwrap();
        }

        assert!(matches!(
            PageStore::open(&path, Arc::new(IoStats::new())),
            Err(Error::NotAFileSystem(_))
        ));
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.fs");
        assert!(PageStore::open(&path, Arc::new(IoStats::new())).is_err());
    }
}
