//! Page number type.

use std::fmt;

use crate::common::config::UNUSED_PAGE;

/// Identifies a page of the host file.
///
/// Page numbers are stored on disk as signed 32-bit integers, but a valid
/// page number is never negative, so the in-memory type is `u32`. Data pages
/// are `[0, page_count)`; the page-layout and file-mapping tables follow.
///
/// # Example
/// ```
/// use pagefs::PageId;
///
/// let page_id = PageId::new(42);
/// assert_eq!(page_id.to_raw(), 42);
/// assert_eq!(PageId::from_raw(42), Some(page_id));
/// assert_eq!(PageId::from_raw(-1), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Page 0 holds the preamble and is never cached.
    pub const PREAMBLE: PageId = PageId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Decode an on-disk page reference. Negative values are not pages.
    #[inline]
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(PageId)
    }

    /// Encode as an on-disk integer.
    #[inline]
    pub fn to_raw(self) -> i32 {
        self.0 as i32
    }

    /// Encode an optional first page for the file-mapping table.
    #[inline]
    pub fn raw_or_unused(page: Option<PageId>) -> i32 {
        page.map_or(UNUSED_PAGE, PageId::to_raw)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_raw_round_trip() {
        assert_eq!(PageId::from_raw(0), Some(PageId::PREAMBLE));
        assert_eq!(PageId::from_raw(UNUSED_PAGE), None);
        assert_eq!(PageId::new(7).to_raw(), 7);
    }

    #[test]
    fn test_raw_or_unused() {
        assert_eq!(PageId::raw_or_unused(None), UNUSED_PAGE);
        assert_eq!(PageId::raw_or_unused(Some(PageId::new(3))), 3);
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::new(1) < PageId::new(2));
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(format!("{}", PageId::new(42)), "Page(42)");
    }
}
