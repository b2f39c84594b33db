//! Page status words of the page-layout table.

use crate::common::config::UNUSED_PAGE;
use crate::common::PageId;

/// Decoded status of one data page.
///
/// On disk every page has one signed 32-bit word:
/// ```text
/// UNUSED_PAGE      free page
/// n > 0            next page of the same chain
/// -k (k >= 0)      last page of its chain, holding k bytes
/// ```
/// A full last page is stored as `-page_size`; an empty one as `0`.
/// Page 0 is the preamble and can therefore never be a link target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Free,
    LinksTo(PageId),
    Terminal(u32),
}

impl PageStatus {
    #[inline]
    pub fn decode(raw: i32) -> Self {
        if raw == UNUSED_PAGE {
            PageStatus::Free
        } else if raw > 0 {
            PageStatus::LinksTo(PageId(raw as u32))
        } else {
            PageStatus::Terminal(raw.unsigned_abs())
        }
    }

    #[inline]
    pub fn encode(self) -> i32 {
        match self {
            PageStatus::Free => UNUSED_PAGE,
            PageStatus::LinksTo(page) => page.to_raw(),
            PageStatus::Terminal(len) => -(len as i32),
        }
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self == PageStatus::Free
    }

    /// The next page of the chain, if this is not the last page.
    #[inline]
    pub fn next(self) -> Option<PageId> {
        match self {
            PageStatus::LinksTo(page) => Some(page),
            _ => None,
        }
    }
}
