//! FileSystemCache - the page-level read/write cache.
//!
//! The [`FileSystemCache`] provides:
//! - Page caching between the page store and the filesystem
//! - Coalescing of partial-page writes into dirty slots
//! - Write-back of dirty slots on eviction, batched with dirty neighbours
//! - Read-ahead of the following pages on a cold read
//! - LRU or FIFO eviction order

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::buffer::replacer::{EvictionPolicy, SlotQueue};
use crate::buffer::{CacheSlot, IoStats};
use crate::common::config::{EVICTION_BATCH, PREFETCH_DEPTH};
use crate::common::{Error, PageId, Result};
use crate::storage::PageStore;

/// A bounded set of page buffers in front of a [`PageStore`].
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                     FileSystemCache                         │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │   slots: Vec<Option<CacheSlot>>   │   │
/// │  │PageId → slot │─▶│  [Slot0] [Slot1] [Slot2] ...      │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐                        │
/// │  │  free_slots  │  │    queue     │  front: newest         │
/// │  │  Vec<usize>  │  │  SlotQueue   │  back:  next victim    │
/// │  └──────────────┘  └──────────────┘                        │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// The cache never owns the page store: every operation that may touch the
/// disk takes it as a parameter. Page 0 (the preamble) always bypasses the
/// cache.
///
/// # Thread Safety
/// None of its own. The cache lives inside the filesystem core and is only
/// reached with the filesystem lock held.
pub struct FileSystemCache {
    /// Slot arena; `None` entries are on `free_slots`.
    slots: Vec<Option<CacheSlot>>,

    /// Reusable arena indices.
    free_slots: Vec<usize>,

    /// Eviction order over occupied arena indices.
    queue: SlotQueue,

    /// Maps page numbers to arena indices. One slot per page at most.
    page_table: HashMap<PageId, usize>,

    /// Maximum number of resident slots.
    capacity: usize,

    page_size: u32,

    /// Read-ahead never reaches past the data region.
    data_pages: u32,

    policy: EvictionPolicy,

    stats: Arc<IoStats>,
}

impl FileSystemCache {
    /// Create an empty cache holding at most `capacity` pages.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(page_size: u32, capacity: usize, stats: Arc<IoStats>) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");

        Self {
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            queue: SlotQueue::with_capacity(capacity),
            page_table: HashMap::with_capacity(capacity),
            capacity,
            page_size,
            data_pages: u32::MAX,
            policy: EvictionPolicy::default(),
            stats,
        }
    }

    /// Bound read-ahead to the first `pages` pages of the host file. The
    /// tables stored after the data region are never prefetched.
    pub fn set_data_page_count(&mut self, pages: u32) {
        self.data_pages = pages;
    }

    // ========================================================================
    // Public API: Lookup and introspection
    // ========================================================================

    /// Look up the resident slot for `page`.
    pub fn find_page(&self, page: PageId) -> Option<&CacheSlot> {
        self.page_table
            .get(&page)
            .and_then(|&index| self.slots[index].as_ref())
    }

    pub fn is_cached(&self, page: PageId) -> bool {
        self.page_table.contains_key(&page)
    }

    /// Number of resident slots.
    pub fn len(&self) -> usize {
        self.page_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident slots that still have to be written back.
    pub fn dirty_count(&self) -> usize {
        self.slots.iter().flatten().filter(|s| s.is_dirty()).count()
    }

    /// Resident page numbers from front (newest) to back (next victim).
    pub fn resident_pages(&self) -> Vec<PageId> {
        self.queue.iter().map(|index| self.slot(index).page_id()).collect()
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Switch between LRU and FIFO. The current queue order is kept.
    pub fn set_eviction_policy(&mut self, policy: EvictionPolicy) {
        self.policy = policy;
    }

    // ========================================================================
    // Public API: Strict access (a miss is an error)
    // ========================================================================

    /// Copy a resident page into `out`.
    ///
    /// # Errors
    /// Returns `Error::NotCached` if the page is not resident.
    pub fn get_page(&mut self, page: PageId, out: &mut [u8]) -> Result<()> {
        let index = self.index_of(page).ok_or(Error::NotCached(page))?;
        out.copy_from_slice(self.slot(index).data());
        self.touch(index);
        Ok(())
    }

    /// Promote a resident page to the front of the queue.
    ///
    /// # Errors
    /// Returns `Error::NotCached` if the page is not resident.
    pub fn touch_page(&mut self, page: PageId) -> Result<()> {
        let index = self.index_of(page).ok_or(Error::NotCached(page))?;
        self.queue.move_to_front(index);
        Ok(())
    }

    // ========================================================================
    // Public API: Loading
    // ========================================================================

    /// Put a copy of `data` into the cache as the content of `page`.
    ///
    /// An already resident page has its buffer overwritten and is promoted;
    /// otherwise slots are evicted from the back until there is room.
    pub fn load_page(&mut self, store: &mut PageStore, page: PageId, data: &[u8]) -> Result<()> {
        if let Some(index) = self.index_of(page) {
            self.slot_mut(index).data_mut().copy_from_slice(data);
            self.queue.move_to_front(index);
            return Ok(());
        }
        self.insert(store, page, data.into())?;
        Ok(())
    }

    /// Like [`load_page`](Self::load_page), but takes ownership of the buffer
    /// instead of copying it.
    pub fn load_page_owned(
        &mut self,
        store: &mut PageStore,
        page: PageId,
        data: Box<[u8]>,
    ) -> Result<()> {
        assert_eq!(data.len(), self.page_size as usize, "buffer is not page-sized");
        if let Some(index) = self.index_of(page) {
            self.slot_mut(index).replace_data(data);
            self.queue.move_to_front(index);
            return Ok(());
        }
        self.insert(store, page, data)?;
        Ok(())
    }

    // ========================================================================
    // Public API: Buffered I/O
    // ========================================================================

    /// Write `data` at `offset` inside `page`.
    ///
    /// Resident pages are updated in place and marked dirty. A full-page
    /// write to a missing page goes straight to disk; a partial write pulls
    /// the page in first.
    pub fn write_to_page(
        &mut self,
        store: &mut PageStore,
        page: PageId,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        if page == PageId::PREAMBLE {
            return store.write_at(page, offset, data);
        }
        self.check_span(page, offset, data.len())?;

        if let Some(index) = self.index_of(page) {
            IoStats::bump(&self.stats.cache_hits);
            self.slot_mut(index).apply(offset as usize, data);
            self.touch(index);
            return Ok(());
        }

        IoStats::bump(&self.stats.cache_misses);
        if offset == 0 && data.len() == self.page_size as usize {
            return store.write_at(page, offset, data);
        }

        let buffer = self.read_uncached(store, page)?;
        let index = self.insert(store, page, buffer)?;
        self.slot_mut(index).apply(offset as usize, data);
        Ok(())
    }

    /// Read `out.len()` bytes at `offset` inside `page`.
    ///
    /// A cold read loads the full page, then prefetches up to
    /// `PREFETCH_DEPTH` following pages that are not yet resident.
    pub fn read_from_page(
        &mut self,
        store: &mut PageStore,
        page: PageId,
        offset: u32,
        out: &mut [u8],
    ) -> Result<()> {
        if page == PageId::PREAMBLE {
            return store.read_at(page, offset, out);
        }
        self.check_span(page, offset, out.len())?;
        let range = offset as usize..offset as usize + out.len();

        if let Some(index) = self.index_of(page) {
            IoStats::bump(&self.stats.cache_hits);
            out.copy_from_slice(&self.slot(index).data()[range]);
            self.touch(index);
            return Ok(());
        }

        IoStats::bump(&self.stats.cache_misses);
        let buffer = self.read_uncached(store, page)?;
        out.copy_from_slice(&buffer[range]);
        self.insert(store, page, buffer)?;
        self.prefetch(store, page)
    }

    /// Evict every slot, back to front, writing dirty ones to disk.
    pub fn flush(&mut self, store: &mut PageStore) -> Result<()> {
        while let Some(index) = self.queue.back() {
            self.evict(store, index)?;
        }
        debug_assert!(self.page_table.is_empty());
        Ok(())
    }

    // ========================================================================
    // Internal: Slot management
    // ========================================================================

    fn index_of(&self, page: PageId) -> Option<usize> {
        self.page_table.get(&page).copied()
    }

    fn slot(&self, index: usize) -> &CacheSlot {
        self.slots[index]
            .as_ref()
            .unwrap_or_else(|| unreachable!("cache slot {index} is not occupied"))
    }

    fn slot_mut(&mut self, index: usize) -> &mut CacheSlot {
        self.slots[index]
            .as_mut()
            .unwrap_or_else(|| unreachable!("cache slot {index} is not occupied"))
    }

    fn touch(&mut self, index: usize) {
        if self.policy.promotes_on_access() {
            self.queue.move_to_front(index);
        }
    }

    fn check_span(&self, page: PageId, offset: u32, len: usize) -> Result<()> {
        if offset as usize + len > self.page_size as usize {
            return Err(Error::PageOutOfRange(page));
        }
        Ok(())
    }

    fn read_uncached(&self, store: &mut PageStore, page: PageId) -> Result<Box<[u8]>> {
        let mut buffer = vec![0u8; self.page_size as usize].into_boxed_slice();
        store.read_page(page, &mut buffer)?;
        Ok(buffer)
    }

    /// Insert a new slot at the front, evicting from the back as needed.
    fn insert(&mut self, store: &mut PageStore, page: PageId, data: Box<[u8]>) -> Result<usize> {
        debug_assert!(!self.is_cached(page));
        self.make_room(store)?;

        let slot = CacheSlot::new(page, data);
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.queue.push_front(index);
        self.page_table.insert(page, index);
        Ok(index)
    }

    /// Evict from the back until one more slot fits. When the victim was
    /// dirty, its dirty successors on disk are written back with it.
    fn make_room(&mut self, store: &mut PageStore) -> Result<()> {
        while self.page_table.len() >= self.capacity {
            let Some(victim) = self.queue.back() else {
                break;
            };
            let victim_page = self.slot(victim).page_id();
            let was_dirty = self.slot(victim).is_dirty();
            self.evict(store, victim)?;

            if was_dirty {
                for step in 1..=EVICTION_BATCH {
                    let neighbour = PageId(victim_page.0 + step);
                    match self.index_of(neighbour) {
                        Some(index) if self.slot(index).is_dirty() => {
                            self.evict(store, index)?;
                        }
                        _ => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove one slot, writing it back first if dirty. On a failed write
    /// the slot stays resident and dirty.
    fn evict(&mut self, store: &mut PageStore, index: usize) -> Result<()> {
        let slot = self.slot(index);
        let page = slot.page_id();
        if slot.is_dirty() {
            trace!(page = page.0, "writing back dirty slot");
            store.write_page(page, slot.data())?;
        }

        self.queue.unlink(index);
        self.page_table.remove(&page);
        self.slots[index] = None;
        self.free_slots.push(index);
        IoStats::bump(&self.stats.evictions);
        Ok(())
    }

    fn prefetch(&mut self, store: &mut PageStore, page: PageId) -> Result<()> {
        // Never read ahead so far that the page just loaded gets evicted.
        let depth = PREFETCH_DEPTH.min(self.capacity.saturating_sub(1) as u32);
        for step in 1..=depth {
            let ahead = PageId(page.0 + step);
            if ahead.0 >= self.data_pages.min(store.total_pages()) || self.is_cached(ahead) {
                continue;
            }
            let Ok(buffer) = self.read_uncached(store, ahead) else {
                continue;
            };
            trace!(page = ahead.0, "prefetched");
            self.insert(store, ahead, buffer)?;
        }
        Ok(())
    }
}
