//! FileSystem - page allocation, mapping tables, resizing and defragmentation.
//!
//! The [`FileSystem`] provides:
//! - Creation and opening of a host file with a valid preamble
//! - Logical files as chains of pages (create / delete)
//! - Nearest-fit page allocation with automatic growth
//! - Explicit growing and shrinking of the data region
//! - Defragmentation that renumbers live pages to the front
//! - Cached or uncached page I/O

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::buffer::{EvictionPolicy, FileSystemCache, IoStats, IoStatsSnapshot};
use crate::common::config::{
    FileSystemConfig, INT_SIZE, MAX_GROWTH_ATTEMPTS, MAX_PAGE_COUNT, MIN_PAGE_COUNT,
    PREAMBLE_LENGTH, SMALL_FILESYSTEM_THRESHOLD, UNUSED_PAGE,
};
use crate::common::{Error, FileHandle, PageId, Result};
use crate::storage::page::{filled_page, layout_pages_for, read_int, write_int, PageStatus, Preamble};
use crate::storage::PageStore;

/// Growth factor per step for filesystems above the small-filesystem threshold.
const GROWTH_FACTOR: f64 = 1.41;

/// A virtual filesystem multiplexed inside one host file.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────┐
/// │                        FileSystem                        │
/// │  ┌────────────────────────────────────────────────────┐  │
/// │  │               Mutex<FsCore>                        │  │
/// │  │  free_pages[block]   free_slots[block]   active    │  │
/// │  │        │                                           │  │
/// │  │        ▼                                           │  │
/// │  │  Option<FileSystemCache> ──▶ PageStore (host file) │  │
/// │  └────────────────────────────────────────────────────┘  │
/// │  stats: Arc<IoStats>  (readable without the lock)        │
/// └──────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// All table reads and mutations run under one coarse lock. Operations that
/// renumber data pages ([`change_size`](Self::change_size),
/// [`defrag`](Self::defrag)) take `&mut self`, so no [`FileObject`] can
/// observe pages moving underneath it.
///
/// [`FileObject`]: crate::fs::FileObject
pub struct FileSystem {
    core: Mutex<FsCore>,
    path: PathBuf,
    stats: Arc<IoStats>,
}

impl FileSystem {
    /// Create a new filesystem, replacing any file at `path`.
    ///
    /// # Errors
    /// Returns `Error::InvalidGeometry` for an illegal page size or page
    /// count, or an I/O error if the host file cannot be written.
    pub fn create<P: AsRef<Path>>(path: P, config: FileSystemConfig) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(IoStats::new());
        let store = PageStore::create(&path, config.page_size, Arc::clone(&stats))?;
        let core = FsCore::format(store, &config, Arc::clone(&stats))?;

        info!(
            path = %path.as_ref().display(),
            page_size = config.page_size,
            page_count = config.page_count,
            "Created filesystem."
        );
        Ok(Self {
            core: Mutex::new(core),
            path: path.as_ref().to_path_buf(),
            stats,
        })
    }

    /// Open an existing filesystem.
    ///
    /// # Errors
    /// Returns `Error::NotAFileSystem` if the preamble is invalid, the file is
    /// too short, or page 0 does not hold the preamble.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stats = Arc::new(IoStats::new());
        let (store, preamble) = PageStore::open(&path, Arc::clone(&stats))?;
        let core = FsCore::load(store, &preamble, Arc::clone(&stats))?;

        info!(
            path = %path.as_ref().display(),
            page_size = preamble.page_size,
            page_count = preamble.page_count,
            "Opened filesystem."
        );
        Ok(Self {
            core: Mutex::new(core),
            path: path.as_ref().to_path_buf(),
            stats,
        })
    }

    /// Run `f` with exclusive access to the table-level operations of
    /// [`FsCore`].
    ///
    /// The lock is held for the duration of `f` only. `f` works on the core
    /// it is handed; calling back into this `FileSystem` or into a
    /// [`FileObject`] from inside `f` blocks forever.
    ///
    /// # Errors
    /// Returns `Error::Inactive` if an earlier structural operation failed.
    ///
    /// # Example
    /// ```no_run
    /// use pagefs::{FileSystem, PageId};
    ///
    /// let fs = FileSystem::open("index.fs").unwrap();
    /// let status = fs.with_core(|core| core.page_status(PageId::new(1))).unwrap();
    /// ```
    ///
    /// [`FileObject`]: crate::fs::FileObject
    pub fn with_core<R>(&self, f: impl FnOnce(&mut FsCore) -> Result<R>) -> Result<R> {
        let mut core = self.lock()?;
        f(&mut core)
    }

    /// Status of a data page in the page-layout table.
    ///
    /// # Errors
    /// Returns `Error::PageOutOfRange` for a page past the data region.
    pub fn page_status(&self, page: PageId) -> Result<PageStatus> {
        self.lock()?.page_status(page)
    }

    /// Acquire the filesystem lock for one crate-internal call sequence.
    ///
    /// # Errors
    /// Returns `Error::Inactive` if an earlier structural operation failed.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, FsCore>> {
        let core = self.core.lock();
        if !core.active {
            return Err(Error::Inactive);
        }
        Ok(core)
    }

    fn core_mut(&mut self) -> Result<&mut FsCore> {
        let core = self.core.get_mut();
        if !core.active {
            return Err(Error::Inactive);
        }
        Ok(core)
    }

    pub fn is_active(&self) -> bool {
        self.core.lock().active
    }

    // ========================================================================
    // Geometry and counters
    // ========================================================================

    pub fn page_size(&self) -> u32 {
        self.core.lock().page_size
    }

    /// Number of data pages.
    pub fn page_count(&self) -> u32 {
        self.core.lock().page_count
    }

    /// Number of data pages that are not free (page 0 included).
    pub fn used_page_count(&self) -> u32 {
        self.core.lock().used_page_count()
    }

    /// Number of occupied file-mapping slots.
    pub fn file_count(&self) -> u32 {
        self.core.lock().file_count()
    }

    /// Number of file-mapping slots, free or not.
    pub fn file_capacity(&self) -> u32 {
        self.core.lock().file_capacity()
    }

    /// Size of the host file in bytes.
    pub fn size(&self) -> Result<u64> {
        self.lock()?.store.file_size()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and write counters, cached and uncached.
    pub fn cache_efficiency(&self) -> IoStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats(&self) -> &Arc<IoStats> {
        &self.stats
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Create an empty file, either in the slot given by `hint` or in the
    /// first free slot.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if `hint` names an occupied slot.
    pub fn create_file(&self, hint: Option<FileHandle>) -> Result<FileHandle> {
        self.lock()?.create_file(hint)
    }

    /// Free every page of a file and release its mapping slot.
    ///
    /// # Errors
    /// Returns `Error::FileNotFound` if the slot is free.
    pub fn delete_file(&self, handle: FileHandle) -> Result<()> {
        self.lock()?.delete_file(handle)
    }

    /// First page of every mapping slot, `None` for free slots.
    pub fn file_page_mapping(&self) -> Result<Vec<Option<PageId>>> {
        self.lock()?.file_page_mapping()
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    /// Grow or shrink the data region to `new_page_count` pages.
    ///
    /// Shrinking defragments first, so every live page ends up below the new
    /// page count.
    ///
    /// # Errors
    /// Returns `Error::InvalidSize` if the target is below the minimum, below
    /// the used page count, or above the maximum. A failure after the host
    /// file was touched leaves the filesystem inactive.
    pub fn change_size(&mut self, new_page_count: u32) -> Result<()> {
        self.core_mut()?.change_size(new_page_count)
    }

    /// Renumber pages so that every file's chain is contiguous and all live
    /// pages precede all free pages.
    pub fn defrag(&mut self) -> Result<()> {
        self.core_mut()?.defrag()
    }

    // ========================================================================
    // Page I/O
    // ========================================================================

    /// Read a full page.
    pub fn read_page(&self, page: PageId, buf: &mut [u8]) -> Result<()> {
        self.lock()?.read_page(page, buf)
    }

    /// Read `buf.len()` bytes at `offset` inside `page`.
    pub fn read_page_range(&self, page: PageId, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.lock()?.read_page_range(page, offset, buf)
    }

    /// Write a full page.
    pub fn write_page(&self, page: PageId, data: &[u8]) -> Result<()> {
        self.lock()?.write_page(page, data)
    }

    /// Write `data` at `offset` inside `page`.
    pub fn write_page_range(&self, page: PageId, offset: u32, data: &[u8]) -> Result<()> {
        self.lock()?.write_page_range(page, offset, data)
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    /// Write back and drop every cached page.
    pub fn flush_cache(&self) -> Result<()> {
        self.lock()?.flush_cache()
    }

    pub fn enable_caching(&self) -> Result<()> {
        self.lock()?.enable_caching();
        Ok(())
    }

    /// Flush and drop the cache; later I/O goes straight to the host file.
    pub fn disable_caching(&self) -> Result<()> {
        self.lock()?.disable_caching()
    }

    pub fn is_caching(&self) -> bool {
        self.core.lock().cache.is_some()
    }

    pub fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()> {
        self.lock()?.set_eviction_policy(policy);
        Ok(())
    }

    pub fn is_cached(&self, page: PageId) -> bool {
        self.core
            .lock()
            .cache
            .as_ref()
            .is_some_and(|cache| cache.is_cached(page))
    }

    /// Flush the cache and force the host file to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut core = self.lock()?;
        core.flush_cache()?;
        core.store.sync()
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if !core.active {
            return;
        }
        if let Err(e) = core.flush_cache() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush cache on close.");
        }
    }
}

/// Lock-protected state of a [`FileSystem`].
///
/// Obtained through [`FileSystem::lock`]. Every method assumes the lock is
/// held, so methods call each other freely without re-acquiring it.
pub struct FsCore {
    store: PageStore,
    cache: Option<FileSystemCache>,
    /// Cache budget in bytes, persisted in the preamble.
    cache_size: u32,
    policy: EvictionPolicy,

    page_size: u32,
    page_count: u32,
    page_layout_size: u32,
    file_mapping_size: u32,
    ints_per_page: u32,
    /// Mapping slots per page: `(first_page, page_count)` pairs.
    double_ints_per_page: u32,

    /// Free data pages per page-layout block.
    free_pages: Vec<u32>,
    /// Free mapping slots per file-mapping page.
    free_slots: Vec<u32>,

    active: bool,
    stats: Arc<IoStats>,
}

impl FsCore {
    fn new(store: PageStore, preamble: &Preamble, stats: Arc<IoStats>) -> Self {
        let ints_per_page = preamble.page_size / INT_SIZE as u32;
        let mut core = Self {
            store,
            cache: None,
            cache_size: preamble.cache_size,
            policy: EvictionPolicy::default(),
            page_size: preamble.page_size,
            page_count: preamble.page_count,
            page_layout_size: preamble.page_layout_size,
            file_mapping_size: preamble.file_mapping_size,
            ints_per_page,
            double_ints_per_page: ints_per_page / 2,
            free_pages: Vec::new(),
            free_slots: Vec::new(),
            active: true,
            stats,
        };
        core.enable_caching();
        core
    }

    /// Lay out a fresh host file: preamble, all pages free, all slots free,
    /// page 0 reserved for the preamble.
    fn format(mut store: PageStore, config: &FileSystemConfig, stats: Arc<IoStats>) -> Result<Self> {
        let preamble = Preamble::new(config);
        store.set_total_pages(preamble.total_pages())?;

        let unused = filled_page(config.page_size, UNUSED_PAGE);
        let tables = preamble.page_count..preamble.total_pages();
        for page in tables {
            store.write_page(PageId(page), &unused)?;
        }
        store.write_preamble(&preamble)?;

        let mut core = Self::new(store, &preamble, stats);
        core.recompute_free_space()?;
        core.set_page_status(PageId::PREAMBLE, PageStatus::Terminal(PREAMBLE_LENGTH))?;
        Ok(core)
    }

    fn load(store: PageStore, preamble: &Preamble, stats: Arc<IoStats>) -> Result<Self> {
        let mut core = Self::new(store, preamble, stats);
        let status = core.page_status(PageId::PREAMBLE)?;
        if status != PageStatus::Terminal(PREAMBLE_LENGTH) {
            return Err(Error::NotAFileSystem(format!(
                "page 0 has status {status:?} instead of the preamble"
            )));
        }
        core.recompute_free_space()?;
        Ok(core)
    }

    /// Run `op`; if it fails, mark the filesystem inactive.
    fn guard_structural<T>(
        &mut self,
        what: &'static str,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let result = op(self);
        if let Err(e) = &result {
            warn!(operation = what, error = %e, "Structural operation failed, filesystem is now inactive.");
            self.active = false;
        }
        result
    }

    /// Flush and detach the cache while `op` runs against the host file
    /// directly, then re-attach it.
    fn with_cache_detached<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(cache) = self.cache.as_mut() {
            cache.flush(&mut self.store)?;
        }
        let mut cache = self.cache.take();
        let result = op(self);
        if let Some(cache) = cache.as_mut() {
            cache.set_data_page_count(self.page_count);
        }
        self.cache = cache;
        result
    }

    // ========================================================================
    // Geometry and counters
    // ========================================================================

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn used_page_count(&self) -> u32 {
        self.page_count - self.free_pages.iter().sum::<u32>()
    }

    pub fn file_count(&self) -> u32 {
        self.file_capacity() - self.free_slots.iter().sum::<u32>()
    }

    pub fn file_capacity(&self) -> u32 {
        self.file_mapping_size * self.double_ints_per_page
    }

    fn preamble(&self) -> Preamble {
        Preamble {
            page_size: self.page_size,
            page_count: self.page_count,
            page_layout_size: self.page_layout_size,
            file_mapping_size: self.file_mapping_size,
            cache_size: self.cache_size,
        }
    }

    /// First page of the page-layout table.
    fn layout_start(&self) -> u32 {
        self.page_count
    }

    /// First page of the file-mapping table.
    fn mapping_start(&self) -> u32 {
        self.page_count + self.page_layout_size
    }

    /// Number of live entries in layout block `block`. Only the last block
    /// can be partial.
    fn entries_in_block(&self, block: u32) -> u32 {
        self.ints_per_page
            .min(self.page_count - block * self.ints_per_page)
    }

    // ========================================================================
    // Page I/O
    // ========================================================================

    pub fn read_page(&mut self, page: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_size as usize);
        self.read_page_range(page, 0, buf)
    }

    pub fn write_page(&mut self, page: PageId, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), self.page_size as usize);
        self.write_page_range(page, 0, data)
    }

    /// Read through the cache when caching is enabled.
    pub fn read_page_range(&mut self, page: PageId, offset: u32, buf: &mut [u8]) -> Result<()> {
        IoStats::bump(&self.stats.reads);
        match self.cache.as_mut() {
            Some(cache) => cache.read_from_page(&mut self.store, page, offset, buf),
            None => self.store.read_at(page, offset, buf),
        }
    }

    /// Write through the cache when caching is enabled.
    pub fn write_page_range(&mut self, page: PageId, offset: u32, data: &[u8]) -> Result<()> {
        IoStats::bump(&self.stats.writes);
        match self.cache.as_mut() {
            Some(cache) => cache.write_to_page(&mut self.store, page, offset, data),
            None => self.store.write_at(page, offset, data),
        }
    }

    fn read_word(&mut self, page: PageId, offset: u32) -> Result<i32> {
        let mut word = [0u8; INT_SIZE];
        self.read_page_range(page, offset, &mut word)?;
        Ok(i32::from_le_bytes(word))
    }

    fn write_word(&mut self, page: PageId, offset: u32, value: i32) -> Result<()> {
        self.write_page_range(page, offset, &value.to_le_bytes())
    }

    // ========================================================================
    // Page-layout table
    // ========================================================================

    fn status_location(&self, page: PageId) -> Result<(PageId, u32)> {
        if page.0 >= self.page_count {
            return Err(Error::PageOutOfRange(page));
        }
        let table_page = PageId(self.layout_start() + page.0 / self.ints_per_page);
        let offset = (page.0 % self.ints_per_page) * INT_SIZE as u32;
        Ok((table_page, offset))
    }

    /// Status of a data page.
    pub fn page_status(&mut self, page: PageId) -> Result<PageStatus> {
        let (table_page, offset) = self.status_location(page)?;
        Ok(PageStatus::decode(self.read_word(table_page, offset)?))
    }

    /// Set the status of a data page, keeping the free-page summary current.
    pub fn set_page_status(&mut self, page: PageId, status: PageStatus) -> Result<()> {
        let (table_page, offset) = self.status_location(page)?;
        let old = PageStatus::decode(self.read_word(table_page, offset)?);
        self.write_word(table_page, offset, status.encode())?;

        let block = (page.0 / self.ints_per_page) as usize;
        match (old.is_free(), status.is_free()) {
            (true, false) => self.free_pages[block] -= 1,
            (false, true) => self.free_pages[block] += 1,
            _ => {}
        }
        Ok(())
    }

    /// Claim a free page, preferring one close to `close_to`. The page is
    /// returned as an empty terminal page. Grows the filesystem when no page
    /// is free.
    ///
    /// # Errors
    /// Returns `Error::CapacityExceeded` if the filesystem cannot grow any
    /// further.
    pub fn claim_free_page(&mut self, close_to: Option<PageId>) -> Result<PageId> {
        for _ in 0..MAX_GROWTH_ATTEMPTS {
            if let Some(page) = self.find_free_page(close_to)? {
                self.set_page_status(page, PageStatus::Terminal(0))?;
                return Ok(page);
            }
            let before = self.page_count;
            self.grow()?;
            if self.page_count <= before {
                break;
            }
        }
        Err(Error::CapacityExceeded {
            requested: self.page_count as u64 + 1,
        })
    }

    /// Search the block of `close_to` outward: forward then backward within
    /// the block, then later blocks, then earlier blocks (nearest first).
    fn find_free_page(&mut self, close_to: Option<PageId>) -> Result<Option<PageId>> {
        let blocks = self.page_layout_size;
        let (start, near) = match close_to {
            Some(page) if page.0 < self.page_count => {
                (page.0 / self.ints_per_page, page.0 % self.ints_per_page)
            }
            _ => (0, 0),
        };

        if let Some(page) = self.free_page_in_block(start, near)? {
            return Ok(Some(page));
        }
        for block in start + 1..blocks {
            if let Some(page) = self.free_page_in_block(block, 0)? {
                return Ok(Some(page));
            }
        }
        for block in (0..start).rev() {
            if let Some(page) = self.free_page_in_block(block, u32::MAX)? {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// Scan one layout block forward from `near`, then backward from it.
    fn free_page_in_block(&mut self, block: u32, near: u32) -> Result<Option<PageId>> {
        if self.free_pages[block as usize] == 0 {
            return Ok(None);
        }
        let mut table = vec![0u8; self.page_size as usize];
        self.read_page(PageId(self.layout_start() + block), &mut table)?;

        let entries = self.entries_in_block(block);
        let near = near.min(entries - 1);
        let found = (near..entries)
            .chain((0..near).rev())
            .find(|&k| read_int(&table, k as usize) == UNUSED_PAGE);

        match found {
            Some(k) => Ok(Some(PageId(block * self.ints_per_page + k))),
            None => Err(Error::Corrupted(format!(
                "layout block {block} has no free entry, summary says {}",
                self.free_pages[block as usize]
            ))),
        }
    }

    /// Recount the free-page and free-slot summaries from the tables.
    fn recompute_free_space(&mut self) -> Result<()> {
        let mut table = vec![0u8; self.page_size as usize];

        let mut free_pages = Vec::with_capacity(self.page_layout_size as usize);
        for block in 0..self.page_layout_size {
            self.read_page(PageId(self.layout_start() + block), &mut table)?;
            let entries = self.entries_in_block(block) as usize;
            let free = (0..entries)
                .filter(|&k| read_int(&table, k) == UNUSED_PAGE)
                .count();
            free_pages.push(free as u32);
        }

        let mut free_slots = Vec::with_capacity(self.file_mapping_size as usize);
        for block in 0..self.file_mapping_size {
            self.read_page(PageId(self.mapping_start() + block), &mut table)?;
            free_slots.push(self.free_slots_in(&table));
        }

        self.free_pages = free_pages;
        self.free_slots = free_slots;
        Ok(())
    }

    fn free_slots_in(&self, table: &[u8]) -> u32 {
        (0..self.double_ints_per_page as usize)
            .filter(|&k| read_int(table, 2 * k) == UNUSED_PAGE)
            .count() as u32
    }

    // ========================================================================
    // File-mapping table
    // ========================================================================

    fn slot_location(&self, handle: FileHandle) -> Result<(PageId, u32)> {
        if handle.0 >= self.file_capacity() {
            return Err(Error::FileNotFound(handle));
        }
        let table_page = PageId(self.mapping_start() + handle.0 / self.double_ints_per_page);
        let offset = (handle.0 % self.double_ints_per_page) * 2 * INT_SIZE as u32;
        Ok((table_page, offset))
    }

    /// First page of a file, `None` if the slot is free.
    pub fn first_page(&mut self, handle: FileHandle) -> Result<Option<PageId>> {
        let (table_page, offset) = self.slot_location(handle)?;
        match self.read_word(table_page, offset)? {
            UNUSED_PAGE => Ok(None),
            raw => PageId::from_raw(raw).map(Some).ok_or_else(|| {
                Error::Corrupted(format!("{handle} has first page {raw}"))
            }),
        }
    }

    /// Set the first page of a slot; `None` frees it.
    pub fn set_first_page(&mut self, handle: FileHandle, page: Option<PageId>) -> Result<()> {
        let (table_page, offset) = self.slot_location(handle)?;
        let was_free = self.read_word(table_page, offset)? == UNUSED_PAGE;
        self.write_word(table_page, offset, PageId::raw_or_unused(page))?;

        let block = (handle.0 / self.double_ints_per_page) as usize;
        match (was_free, page.is_none()) {
            (true, false) => self.free_slots[block] -= 1,
            (false, true) => self.free_slots[block] += 1,
            _ => {}
        }
        Ok(())
    }

    /// Number of pages in a file's chain.
    ///
    /// # Errors
    /// Returns `Error::FileNotFound` if the slot is free.
    pub fn file_page_count(&mut self, handle: FileHandle) -> Result<u32> {
        let (table_page, offset) = self.slot_location(handle)?;
        match self.read_word(table_page, offset + INT_SIZE as u32)? {
            UNUSED_PAGE => Err(Error::FileNotFound(handle)),
            raw => u32::try_from(raw).map_err(|_| {
                Error::Corrupted(format!("{handle} has page count {raw}"))
            }),
        }
    }

    pub fn set_file_page_count(&mut self, handle: FileHandle, count: u32) -> Result<()> {
        let (table_page, offset) = self.slot_location(handle)?;
        self.write_word(table_page, offset + INT_SIZE as u32, count as i32)
    }

    fn clear_slot(&mut self, handle: FileHandle) -> Result<()> {
        self.set_first_page(handle, None)?;
        let (table_page, offset) = self.slot_location(handle)?;
        self.write_word(table_page, offset + INT_SIZE as u32, UNUSED_PAGE)
    }

    /// First page of every mapping slot.
    pub fn file_page_mapping(&mut self) -> Result<Vec<Option<PageId>>> {
        let mut table = vec![0u8; self.page_size as usize];
        let mut mapping = Vec::with_capacity(self.file_capacity() as usize);
        for block in 0..self.file_mapping_size {
            self.read_page(PageId(self.mapping_start() + block), &mut table)?;
            mapping.extend(
                (0..self.double_ints_per_page as usize)
                    .map(|k| PageId::from_raw(read_int(&table, 2 * k))),
            );
        }
        Ok(mapping)
    }

    /// Find a free mapping slot, growing the table by a page if none is
    /// free. The slot stays free until its first page is set.
    pub fn claim_free_file_number(&mut self) -> Result<FileHandle> {
        for _ in 0..MAX_GROWTH_ATTEMPTS {
            if let Some(block) = self.free_slots.iter().position(|&free| free > 0) {
                let mut table = vec![0u8; self.page_size as usize];
                self.read_page(PageId(self.mapping_start() + block as u32), &mut table)?;
                let slot = (0..self.double_ints_per_page)
                    .find(|&k| read_int(&table, 2 * k as usize) == UNUSED_PAGE)
                    .ok_or_else(|| {
                        Error::Corrupted(format!("mapping page {block} has no free slot"))
                    })?;
                return Ok(FileHandle(block as u32 * self.double_ints_per_page + slot));
            }
            self.increase_file_mapping_size()?;
        }
        Err(Error::CapacityExceeded {
            requested: self.file_capacity() as u64 + 1,
        })
    }

    /// Append one page of free slots to the file-mapping table.
    pub fn increase_file_mapping_size(&mut self) -> Result<()> {
        self.guard_structural("increase file mapping size", |core| {
            core.with_cache_detached(|core| {
                let new_page = PageId(core.store.total_pages());
                core.store.set_total_pages(new_page.0 + 1)?;
                core.store
                    .write_page(new_page, &filled_page(core.page_size, UNUSED_PAGE))?;

                core.file_mapping_size += 1;
                let preamble = core.preamble();
                core.store.write_preamble(&preamble)?;
                core.free_slots.push(core.double_ints_per_page);
                debug!(pages = core.file_mapping_size, "Grew file mapping table.");
                Ok(())
            })
        })
    }

    /// Drop the last page of the file-mapping table if it holds no file.
    /// Returns whether the table shrank.
    pub fn decrease_file_mapping_size(&mut self) -> Result<bool> {
        let last = self.free_slots.len() - 1;
        if self.file_mapping_size < 2 || self.free_slots[last] != self.double_ints_per_page {
            return Ok(false);
        }
        self.guard_structural("decrease file mapping size", |core| {
            core.with_cache_detached(|core| {
                core.file_mapping_size -= 1;
                let preamble = core.preamble();
                core.store.write_preamble(&preamble)?;
                core.store.set_total_pages(core.store.total_pages() - 1)?;
                core.free_slots.pop();
                debug!(pages = core.file_mapping_size, "Shrank file mapping table.");
                Ok(true)
            })
        })
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Create an empty file of one page.
    ///
    /// The first page is claimed before the mapping table is touched, so a
    /// full filesystem leaves the table as it was.
    pub fn create_file(&mut self, hint: Option<FileHandle>) -> Result<FileHandle> {
        if let Some(handle) = hint {
            if handle.0 < self.file_capacity() && self.first_page(handle)?.is_some() {
                return Err(Error::FileExists(handle));
            }
        }

        let first = self.claim_free_page(None)?;
        let handle = match self.reserve_slot(hint) {
            Ok(handle) => handle,
            Err(err) => {
                self.set_page_status(first, PageStatus::Free)?;
                return Err(err);
            }
        };
        self.set_first_page(handle, Some(first))?;
        self.set_file_page_count(handle, 1)?;
        debug!(file = handle.0, first_page = first.0, "Created file.");
        Ok(handle)
    }

    /// Mapping slot for a new file: `hint`, with the table grown to reach
    /// it, or the first free slot.
    fn reserve_slot(&mut self, hint: Option<FileHandle>) -> Result<FileHandle> {
        match hint {
            Some(handle) => {
                while handle.0 >= self.file_capacity() {
                    self.increase_file_mapping_size()?;
                }
                Ok(handle)
            }
            None => self.claim_free_file_number(),
        }
    }

    /// Pages of a file's chain, in order, validated against the page count
    /// stored in its mapping slot.
    pub fn file_pages(&mut self, handle: FileHandle) -> Result<(Vec<PageId>, u32)> {
        let first = self.first_page(handle)?.ok_or(Error::FileNotFound(handle))?;
        let count = self.file_page_count(handle)?;

        let mut pages = Vec::with_capacity(count as usize);
        let mut page = first;
        loop {
            if pages.len() >= count as usize {
                return Err(Error::Corrupted(format!(
                    "{handle} chain is longer than its {count} pages"
                )));
            }
            pages.push(page);
            match self.page_status(page)? {
                PageStatus::LinksTo(next) => page = next,
                PageStatus::Terminal(len) if len <= self.page_size => {
                    if pages.len() != count as usize {
                        return Err(Error::Corrupted(format!(
                            "{handle} chain has {} pages, mapping says {count}",
                            pages.len()
                        )));
                    }
                    return Ok((pages, len));
                }
                status => {
                    return Err(Error::Corrupted(format!(
                        "{handle} chain reaches {page} with status {status:?}"
                    )));
                }
            }
        }
    }

    pub fn delete_file(&mut self, handle: FileHandle) -> Result<()> {
        let (pages, _) = self.file_pages(handle)?;

        self.clear_slot(handle)?;
        for &page in &pages {
            self.set_page_status(page, PageStatus::Free)?;
        }

        while self.file_mapping_size >= 2
            && self.free_slots[self.free_slots.len() - 2..]
                .iter()
                .all(|&free| free == self.double_ints_per_page)
        {
            if !self.decrease_file_mapping_size()? {
                break;
            }
        }
        debug!(file = handle.0, pages = pages.len(), "Deleted file.");
        Ok(())
    }

    // ========================================================================
    // Resizing
    // ========================================================================

    /// Target of one automatic growth step: `×1.41²` for small filesystems,
    /// `×1.41` otherwise, rounded up to whole layout pages.
    fn growth_target(&self) -> u32 {
        let factor = if self.page_count <= SMALL_FILESYSTEM_THRESHOLD {
            GROWTH_FACTOR * GROWTH_FACTOR
        } else {
            GROWTH_FACTOR
        };
        let grown = (self.page_count as f64 * factor).ceil() as u64;
        let ipp = self.ints_per_page as u64;
        grown.div_ceil(ipp).saturating_mul(ipp).min(MAX_PAGE_COUNT as u64) as u32
    }

    fn grow(&mut self) -> Result<()> {
        let target = self.growth_target();
        if target <= self.page_count {
            return Err(Error::CapacityExceeded {
                requested: self.page_count as u64 + 1,
            });
        }
        info!(from = self.page_count, to = target, "Growing filesystem.");
        self.guard_structural("grow", |core| {
            core.with_cache_detached(|core| core.grow_tables(target))
        })
    }

    pub(crate) fn change_size(&mut self, new_page_count: u32) -> Result<()> {
        let invalid = |reason| Error::InvalidSize {
            requested: new_page_count,
            reason,
        };
        if new_page_count < MIN_PAGE_COUNT {
            return Err(invalid("below the minimum page count"));
        }
        if new_page_count < self.used_page_count() {
            return Err(invalid("below the used page count"));
        }
        if new_page_count > MAX_PAGE_COUNT {
            return Err(invalid("above the maximum page count"));
        }

        if new_page_count < self.page_count {
            info!(from = self.page_count, to = new_page_count, "Shrinking filesystem.");
            self.defrag()?;
            self.guard_structural("shrink", |core| {
                core.with_cache_detached(|core| core.shrink_tables(new_page_count))
            })
        } else if new_page_count > self.page_count {
            info!(from = self.page_count, to = new_page_count, "Growing filesystem.");
            self.guard_structural("grow", |core| {
                core.with_cache_detached(|core| core.grow_tables(new_page_count))
            })
        } else {
            Ok(())
        }
    }

    /// Move both tables up to make room for more data pages. Runs uncached.
    fn grow_tables(&mut self, new_page_count: u32) -> Result<()> {
        let old_count = self.page_count;
        let old_layout = self.page_layout_size;
        let new_layout = layout_pages_for(new_page_count, self.page_size);
        let mapping = self.file_mapping_size;

        self.store
            .set_total_pages(new_page_count + new_layout + mapping)?;

        // Destinations lie above their sources: copy back to front.
        for i in (0..mapping).rev() {
            self.store.copy_page(
                PageId(old_count + old_layout + i),
                PageId(new_page_count + new_layout + i),
            )?;
        }
        for i in (0..old_layout).rev() {
            self.store
                .copy_page(PageId(old_count + i), PageId(new_page_count + i))?;
        }
        let unused = filled_page(self.page_size, UNUSED_PAGE);
        for i in old_layout..new_layout {
            self.store.write_page(PageId(new_page_count + i), &unused)?;
        }

        self.page_count = new_page_count;
        self.page_layout_size = new_layout;
        self.clear_layout_tail(old_count)?;
        let preamble = self.preamble();
        self.store.write_preamble(&preamble)?;
        self.recompute_free_space()
    }

    /// Move both tables down after a defrag. Runs uncached.
    fn shrink_tables(&mut self, new_page_count: u32) -> Result<()> {
        let old_count = self.page_count;
        let old_layout = self.page_layout_size;
        let new_layout = layout_pages_for(new_page_count, self.page_size);
        let mapping = self.file_mapping_size;

        // Destinations lie below their sources: copy front to back.
        for i in 0..new_layout {
            self.store
                .copy_page(PageId(old_count + i), PageId(new_page_count + i))?;
        }
        for i in 0..mapping {
            self.store.copy_page(
                PageId(old_count + old_layout + i),
                PageId(new_page_count + new_layout + i),
            )?;
        }

        self.page_count = new_page_count;
        self.page_layout_size = new_layout;
        self.clear_layout_tail(new_page_count)?;
        let preamble = self.preamble();
        self.store.write_preamble(&preamble)?;
        self.store
            .set_total_pages(new_page_count + new_layout + mapping)?;
        self.recompute_free_space()
    }

    /// Mark every layout entry from `first` to the end of its block as free.
    fn clear_layout_tail(&mut self, first: u32) -> Result<()> {
        let start = first % self.ints_per_page;
        if start == 0 || first >= self.page_layout_size * self.ints_per_page {
            return Ok(());
        }
        let table_page = PageId(self.layout_start() + first / self.ints_per_page);
        let mut table = vec![0u8; self.page_size as usize];
        self.store.read_page(table_page, &mut table)?;
        for k in start..self.ints_per_page {
            write_int(&mut table, k as usize, UNUSED_PAGE);
        }
        self.store.write_page(table_page, &table)
    }

    // ========================================================================
    // Defragmentation
    // ========================================================================

    pub(crate) fn defrag(&mut self) -> Result<()> {
        let moved = self.guard_structural("defrag", |core| core.with_cache_detached(Self::defrag_uncached))?;
        info!(moved, "Defragmented filesystem.");
        Ok(())
    }

    /// Compute the target position of every data page: page 0 stays put,
    /// live pages follow in chain order file by file, free pages come last.
    fn defrag_permutation(&mut self, statuses: &[PageStatus]) -> Result<Vec<u32>> {
        let count = self.page_count as usize;
        let mut new_pos: Vec<Option<u32>> = vec![None; count];
        new_pos[0] = Some(0);
        let mut next = 1u32;

        for slot in self.file_page_mapping()? {
            let Some(mut page) = slot else {
                continue;
            };
            loop {
                let entry = new_pos.get_mut(page.index()).ok_or_else(|| {
                    Error::Corrupted(format!("chain leaves the data region at {page}"))
                })?;
                if entry.is_some() {
                    return Err(Error::Corrupted(format!("{page} is referenced twice")));
                }
                *entry = Some(next);
                next += 1;

                match statuses[page.index()] {
                    PageStatus::LinksTo(following) => page = following,
                    PageStatus::Terminal(_) => break,
                    PageStatus::Free => {
                        return Err(Error::Corrupted(format!("chain reaches free {page}")));
                    }
                }
            }
        }

        for (entry, status) in new_pos.iter_mut().zip(statuses) {
            if entry.is_none() && status.is_free() {
                *entry = Some(next);
                next += 1;
            }
        }
        // A live page no chain reaches would end up among the free pages.
        if let Some(orphan) = new_pos.iter().position(Option::is_none) {
            return Err(Error::Corrupted(format!(
                "{} is in use but belongs to no file",
                PageId(orphan as u32)
            )));
        }
        assert_eq!(next as usize, count, "defrag permutation is incomplete");
        Ok(new_pos.into_iter().flatten().collect())
    }

    /// Returns the number of data pages that changed position.
    fn defrag_uncached(&mut self) -> Result<usize> {
        let count = self.page_count as usize;
        let mut statuses = Vec::with_capacity(count);
        let mut table = vec![0u8; self.page_size as usize];
        for block in 0..self.page_layout_size {
            self.store
                .read_page(PageId(self.layout_start() + block), &mut table)?;
            let entries = self.entries_in_block(block) as usize;
            statuses.extend((0..entries).map(|k| PageStatus::decode(read_int(&table, k))));
        }

        let mut new_pos = self.defrag_permutation(&statuses)?;
        let moved = new_pos
            .iter()
            .enumerate()
            .filter(|&(p, &q)| p != q as usize)
            .count();

        // Page-layout table, with links translated through the permutation.
        let mut renumbered = vec![PageStatus::Free; count];
        for (page, status) in statuses.into_iter().enumerate() {
            renumbered[new_pos[page] as usize] = match status {
                PageStatus::LinksTo(next) => {
                    let target = new_pos.get(next.index()).ok_or_else(|| {
                        Error::Corrupted(format!("Page({page}) links outside the data region"))
                    })?;
                    PageStatus::LinksTo(PageId(*target))
                }
                other => other,
            };
        }
        for block in 0..self.page_layout_size {
            let first = (block * self.ints_per_page) as usize;
            let entries = self.entries_in_block(block) as usize;
            let mut table = filled_page(self.page_size, UNUSED_PAGE);
            for k in 0..entries {
                write_int(&mut table, k, renumbered[first + k].encode());
            }
            self.store
                .write_page(PageId(self.layout_start() + block), &table)?;
        }

        // File-mapping table.
        for block in 0..self.file_mapping_size {
            let table_page = PageId(self.mapping_start() + block);
            self.store.read_page(table_page, &mut table)?;
            for k in 0..self.double_ints_per_page as usize {
                if let Some(first) = PageId::from_raw(read_int(&table, 2 * k)) {
                    write_int(&mut table, 2 * k, new_pos[first.index()] as i32);
                }
            }
            self.store.write_page(table_page, &table)?;
        }

        // Page contents: follow each cycle, placing one page per swap.
        for page in 0..count {
            while new_pos[page] as usize != page {
                let target = new_pos[page] as usize;
                self.swap_pages(PageId(page as u32), PageId(target as u32))?;
                new_pos[page] = new_pos[target];
                new_pos[target] = target as u32;
            }
        }

        self.recompute_free_space()?;
        Ok(moved)
    }

    fn swap_pages(&mut self, a: PageId, b: PageId) -> Result<()> {
        let mut first = vec![0u8; self.page_size as usize];
        let mut second = vec![0u8; self.page_size as usize];
        self.store.read_page(a, &mut first)?;
        self.store.read_page(b, &mut second)?;
        self.store.write_page(a, &second)?;
        self.store.write_page(b, &first)
    }

    // ========================================================================
    // Cache control
    // ========================================================================

    pub fn flush_cache(&mut self) -> Result<()> {
        match self.cache.as_mut() {
            Some(cache) => cache.flush(&mut self.store),
            None => Ok(()),
        }
    }

    /// Attach a cache sized by the configured budget. A budget smaller than
    /// one page leaves caching off.
    pub fn enable_caching(&mut self) {
        if self.cache.is_some() {
            return;
        }
        let slots = (self.cache_size / self.page_size) as usize;
        if slots == 0 {
            return;
        }
        let mut cache = FileSystemCache::new(self.page_size, slots, Arc::clone(&self.stats));
        cache.set_eviction_policy(self.policy);
        cache.set_data_page_count(self.page_count);
        self.cache = Some(cache);
    }

    pub fn disable_caching(&mut self) -> Result<()> {
        self.flush_cache()?;
        self.cache = None;
        Ok(())
    }

    pub fn set_eviction_policy(&mut self, policy: EvictionPolicy) {
        self.policy = policy;
        if let Some(cache) = self.cache.as_mut() {
            cache.set_eviction_policy(policy);
        }
    }

    pub fn cache(&self) -> Option<&FileSystemCache> {
        self.cache.as_ref()
    }
}
