//! CacheSlot - one resident page in the filesystem cache.
//!
//! A [`CacheSlot`] holds a page-sized buffer plus the metadata needed for
//! write-back:
//! - Which page is loaded
//! - Dirty flag

use crate::common::PageId;

/// A cached copy of one page.
///
/// Slots live in the cache's arena and are only touched while the
/// filesystem lock is held, so no interior mutability is needed.
#[derive(Debug)]
pub struct CacheSlot {
    page_id: PageId,
    /// Whether the buffer has diverged from the page on disk.
    dirty: bool,
    data: Box<[u8]>,
}

impl CacheSlot {
    /// Create a clean slot owning `data`.
    pub fn new(page_id: PageId, data: Box<[u8]>) -> Self {
        Self {
            page_id,
            dirty: false,
            data,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Swap in a new buffer, returning the old one.
    pub fn replace_data(&mut self, data: Box<[u8]>) -> Box<[u8]> {
        std::mem::replace(&mut self.data, data)
    }

    /// Copy `bytes` into the buffer at `offset` and mark the slot dirty.
    ///
    /// # Panics
    /// Panics if the range does not fit the page.
    pub fn apply(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(page: u32) -> CacheSlot {
        CacheSlot::new(PageId::new(page), vec![0u8; 128].into_boxed_slice())
    }

    #[test]
    fn test_slot_new_is_clean() {
        let slot = slot(3);
        assert_eq!(slot.page_id(), PageId::new(3));
        assert!(!slot.is_dirty());
        assert_eq!(slot.data().len(), 128);
    }

    #[test]
    fn test_slot_apply_marks_dirty() {
        let mut slot = slot(1);
        slot.apply(10, b"abc");

        assert!(slot.is_dirty());
        assert_eq!(&slot.data()[10..13], b"abc");
        assert_eq!(slot.data()[9], 0);
    }

    #[test]
    fn test_slot_dirty_flag() {
        let mut slot = slot(1);
        slot.mark_dirty();
        assert!(slot.is_dirty());
        slot.clear_dirty();
        assert!(!slot.is_dirty());
    }

    #[test]
    fn test_slot_replace_data() {
        let mut slot = slot(1);
        let old = slot.replace_data(vec![9u8; 128].into_boxed_slice());

        assert!(old.iter().all(|&b| b == 0));
        assert!(slot.data().iter().all(|&b| b == 9));
    }

    #[test]
    #[should_panic]
    fn test_slot_apply_out_of_range() {
        let mut slot = slot(1);
        slot.apply(126, b"abc");
    }
}
