//! FileObject - byte-level cursor over one file's page chain.

use parking_lot::Mutex;

use crate::common::{Error, FileHandle, PageId, Result};
use crate::fs::{FileSystem, FsCore};
use crate::storage::page::PageStatus;

/// Smallest page array allocated for a file with more than one page.
const MIN_PAGE_ARRAY_CAPACITY: usize = 16;

/// Cursor state, guarded by the object's own lock.
#[derive(Debug)]
struct Cursor {
    /// Every page of the chain, in order.
    pages: Vec<PageId>,
    size: u64,
    seek_pos: u64,
}

/// An open logical file.
///
/// Reads and writes are translated into page-relative I/O along the file's
/// chain; writes past the last page extend the chain with pages claimed
/// close to the previous last page.
///
/// # Thread Safety
/// A `FileObject` may be shared between threads. Each call holds the
/// object's lock and then the filesystem lock for its whole duration, so a
/// seek-and-read or a multi-page write is atomic with respect to the same
/// object.
///
/// # Example
/// ```no_run
/// use pagefs::{FileObject, FileSystem, FileSystemConfig};
///
/// let fs = FileSystem::create("index.fs", FileSystemConfig::default()).unwrap();
/// let file = FileObject::create(&fs).unwrap();
/// file.write(b"hello world").unwrap();
///
/// let mut buf = [0u8; 5];
/// file.seek_and_read(6, &mut buf).unwrap();
/// assert_eq!(&buf, b"world");
/// ```
pub struct FileObject<'fs> {
    fs: &'fs FileSystem,
    handle: FileHandle,
    page_size: u32,
    cursor: Mutex<Cursor>,
}

impl<'fs> FileObject<'fs> {
    /// Create a new empty file in the first free slot and open it.
    pub fn create(fs: &'fs FileSystem) -> Result<Self> {
        Self::create_with(fs, None)
    }

    /// Create a new empty file, optionally in a specific slot, and open it.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the hinted slot is occupied.
    pub fn create_with(fs: &'fs FileSystem, hint: Option<FileHandle>) -> Result<Self> {
        let mut core = fs.lock()?;
        let handle = core.create_file(hint)?;
        Self::load(fs, &mut core, handle)
    }

    /// Open an existing file.
    ///
    /// # Errors
    /// Returns `Error::FileNotFound` if the slot is free, or
    /// `Error::Corrupted` if the chain disagrees with the mapping table.
    pub fn open(fs: &'fs FileSystem, handle: FileHandle) -> Result<Self> {
        let mut core = fs.lock()?;
        Self::load(fs, &mut core, handle)
    }

    fn load(fs: &'fs FileSystem, core: &mut FsCore, handle: FileHandle) -> Result<Self> {
        let (chain, last_len) = core.file_pages(handle)?;
        let page_size = core.page_size();

        let capacity = match chain.len() {
            0 | 1 => 1,
            n => MIN_PAGE_ARRAY_CAPACITY.max(2 * n),
        };
        let mut pages = Vec::with_capacity(capacity);
        pages.extend_from_slice(&chain);

        let size = (pages.len() as u64 - 1) * page_size as u64 + last_len as u64;
        Ok(Self {
            fs,
            handle,
            page_size,
            cursor: Mutex::new(Cursor {
                pages,
                size,
                seek_pos: 0,
            }),
        })
    }

    #[inline]
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.cursor.lock().size
    }

    pub fn page_count(&self) -> u32 {
        self.cursor.lock().pages.len() as u32
    }

    pub fn seek_pos(&self) -> u64 {
        self.cursor.lock().seek_pos
    }

    /// Pages of the chain, in order.
    pub fn pages(&self) -> Vec<PageId> {
        self.cursor.lock().pages.clone()
    }

    /// Move the cursor to `pos`.
    ///
    /// # Errors
    /// Returns `Error::SeekOutOfRange` if `pos` lies beyond the end of file.
    pub fn seek(&self, pos: u64) -> Result<()> {
        let mut cursor = self.cursor.lock();
        Self::seek_locked(&mut cursor, pos)
    }

    fn seek_locked(cursor: &mut Cursor, pos: u64) -> Result<()> {
        if pos > cursor.size {
            return Err(Error::SeekOutOfRange {
                pos,
                size: cursor.size,
            });
        }
        cursor.seek_pos = pos;
        Ok(())
    }

    /// Read up to `buf.len()` bytes at the cursor. Returns the number of
    /// bytes read, which is 0 at end of file.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = self.cursor.lock();
        self.read_locked(&mut cursor, buf)
    }

    /// Seek to `pos` and read, as one atomic step.
    pub fn seek_and_read(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = self.cursor.lock();
        Self::seek_locked(&mut cursor, pos)?;
        self.read_locked(&mut cursor, buf)
    }

    /// Read up to `len` bytes at the cursor into a new buffer.
    pub fn read_vec(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let read = self.read(&mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }

    fn read_locked(&self, cursor: &mut Cursor, buf: &mut [u8]) -> Result<usize> {
        let page_size = self.page_size as u64;
        let mut core = self.fs.lock()?;
        let mut done = 0;

        while done < buf.len() && cursor.seek_pos < cursor.size {
            let page = cursor.pages[(cursor.seek_pos / page_size) as usize];
            let offset = cursor.seek_pos % page_size;
            let chunk = (page_size - offset)
                .min((buf.len() - done) as u64)
                .min(cursor.size - cursor.seek_pos) as usize;

            core.read_page_range(page, offset as u32, &mut buf[done..done + chunk])?;
            done += chunk;
            cursor.seek_pos += chunk as u64;
        }
        Ok(done)
    }

    /// Write `data` at the cursor, extending the file as needed. Returns the
    /// number of bytes written.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let mut cursor = self.cursor.lock();
        let page_size = self.page_size as u64;
        let mut core = self.fs.lock()?;
        let mut done = 0;

        while done < data.len() {
            let index = (cursor.seek_pos / page_size) as usize;
            if index >= cursor.pages.len() {
                self.append_page(&mut core, &mut cursor)?;
            }

            let page = cursor.pages[index];
            let offset = cursor.seek_pos % page_size;
            let chunk = (page_size - offset).min((data.len() - done) as u64) as usize;

            core.write_page_range(page, offset as u32, &data[done..done + chunk])?;
            done += chunk;
            cursor.seek_pos += chunk as u64;

            if cursor.seek_pos > cursor.size {
                cursor.size = cursor.seek_pos;
                let tail = match cursor.size % page_size {
                    0 => self.page_size,
                    len => len as u32,
                };
                let last = cursor.pages[cursor.pages.len() - 1];
                core.set_page_status(last, PageStatus::Terminal(tail))?;
            }
        }
        Ok(done)
    }

    /// Claim a page near the current last page and link it to the chain.
    fn append_page(&self, core: &mut FsCore, cursor: &mut Cursor) -> Result<()> {
        let last = cursor.pages[cursor.pages.len() - 1];
        let page = core.claim_free_page(Some(last))?;
        core.set_page_status(last, PageStatus::LinksTo(page))?;

        if cursor.pages.len() == cursor.pages.capacity() {
            let extra = cursor.pages.len().max(MIN_PAGE_ARRAY_CAPACITY);
            cursor.pages.reserve_exact(extra);
        }
        cursor.pages.push(page);
        core.set_file_page_count(self.handle, cursor.pages.len() as u32)
    }

    /// Delete the file from its filesystem.
    pub fn delete(self) -> Result<()> {
        self.fs.delete_file(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FileSystemConfig;
    use tempfile::{tempdir, TempDir};

    const PAGE: u32 = 128;

    fn create_fs() -> (TempDir, FileSystem) {
        let dir = tempdir().unwrap();
        let config = FileSystemConfig::new(PAGE, 64).with_cache_size(PAGE * 8);
        let fs = FileSystem::create(dir.path().join("objects.fs"), config).unwrap();
        (dir, fs)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_new_file_is_empty() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();

        assert_eq!(file.size(), 0);
        assert_eq!(file.page_count(), 1);
        assert_eq!(file.seek_pos(), 0);
        assert_eq!(file.read_vec(10).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_write_within_one_page() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();

        assert_eq!(file.write(b"hello").unwrap(), 5);
        assert_eq!(file.size(), 5);
        assert_eq!(file.seek_pos(), 5);

        file.seek(0).unwrap();
        assert_eq!(file.read_vec(100).unwrap(), b"hello");

        let last = file.pages()[0];
        let status = fs.page_status(last).unwrap();
        assert_eq!(status, PageStatus::Terminal(5));
    }

    #[test]
    fn test_write_across_pages() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        let data = pattern(3 * PAGE as usize + 17);

        assert_eq!(file.write(&data).unwrap(), data.len());
        assert_eq!(file.page_count(), 4);
        assert_eq!(file.size(), data.len() as u64);

        let mut out = vec![0u8; data.len()];
        assert_eq!(file.seek_and_read(0, &mut out).unwrap(), data.len());
        assert_eq!(out, data);

        let mut core = fs.lock().unwrap();
        assert_eq!(core.file_page_count(file.handle()).unwrap(), 4);
        let pages = file.pages();
        assert_eq!(
            core.page_status(pages[0]).unwrap(),
            PageStatus::LinksTo(pages[1])
        );
        assert_eq!(
            core.page_status(pages[3]).unwrap(),
            PageStatus::Terminal(17)
        );
    }

    #[test]
    fn test_full_last_page_status() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(&pattern(2 * PAGE as usize)).unwrap();

        assert_eq!(file.page_count(), 2);
        let last = file.pages()[1];
        assert_eq!(
            fs.page_status(last).unwrap(),
            PageStatus::Terminal(PAGE)
        );

        let reopened = FileObject::open(&fs, file.handle()).unwrap();
        assert_eq!(reopened.size(), 2 * PAGE as u64);
    }

    #[test]
    fn test_overwrite_in_middle_keeps_size() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        let mut data = pattern(300);
        file.write(&data).unwrap();

        file.seek(120).unwrap();
        file.write(b"XXXXXXXXXXXX").unwrap();
        data[120..132].copy_from_slice(b"XXXXXXXXXXXX");

        assert_eq!(file.size(), 300);
        let mut out = vec![0u8; 300];
        file.seek_and_read(0, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_seek_beyond_end_fails() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(b"abc").unwrap();

        assert!(file.seek(3).is_ok());
        assert!(matches!(
            file.seek(4),
            Err(Error::SeekOutOfRange { pos: 4, size: 3 })
        ));
        assert_eq!(file.seek_pos(), 3);
    }

    #[test]
    fn test_read_clamps_at_end_of_file() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(&pattern(200)).unwrap();

        let mut out = vec![0u8; 500];
        assert_eq!(file.seek_and_read(150, &mut out).unwrap(), 50);
        assert_eq!(&out[..50], &pattern(200)[150..]);
        assert_eq!(file.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_open_existing_and_missing() {
        let (_dir, fs) = create_fs();
        let handle = {
            let file = FileObject::create(&fs).unwrap();
            file.write(&pattern(400)).unwrap();
            file.handle()
        };

        let file = FileObject::open(&fs, handle).unwrap();
        assert_eq!(file.size(), 400);
        assert_eq!(file.read_vec(400).unwrap(), pattern(400));

        assert!(matches!(
            FileObject::open(&fs, FileHandle::new(9)),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_open_detects_count_mismatch() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(&pattern(300)).unwrap();
        fs.lock()
            .unwrap()
            .set_file_page_count(file.handle(), 2)
            .unwrap();

        assert!(matches!(
            FileObject::open(&fs, file.handle()),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_delete_frees_pages() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(&pattern(500)).unwrap();
        let pages = file.pages();
        let used = fs.used_page_count();

        file.delete().unwrap();
        assert_eq!(fs.used_page_count(), used - pages.len() as u32);
        let mut core = fs.lock().unwrap();
        for page in pages {
            assert!(core.page_status(page).unwrap().is_free());
        }
    }

    #[test]
    fn test_pages_claimed_close_together() {
        let (_dir, fs) = create_fs();
        let file = FileObject::create(&fs).unwrap();
        file.write(&pattern(5 * PAGE as usize)).unwrap();

        let pages = file.pages();
        assert!(pages.windows(2).all(|w| w[1].0 == w[0].0 + 1));
    }
}
