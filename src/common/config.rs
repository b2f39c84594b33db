//! Configuration constants and creation parameters for a paged filesystem.

use crate::common::{Error, Result};

/// Width of one on-disk integer (page status, first page, page count).
pub const INT_SIZE: usize = 4;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;

/// Initial number of data pages used when none is given.
pub const DEFAULT_PAGE_COUNT: u32 = 1024;

/// Smallest allowed page size in bytes.
pub const MIN_PAGE_SIZE: u32 = 128;

/// Largest allowed page size in bytes.
pub const MAX_PAGE_SIZE: u32 = 8192;

/// Smallest allowed number of data pages.
pub const MIN_PAGE_COUNT: u32 = 32;

/// Largest allowed number of data pages (2^30).
pub const MAX_PAGE_COUNT: u32 = 1 << 30;

/// Filesystems with at most this many pages grow by `1.41²` instead of `1.41`.
pub const SMALL_FILESYSTEM_THRESHOLD: u32 = 1024;

/// Default cache budget in bytes (1 MiB).
pub const DEFAULT_CACHE_SIZE: u32 = 1024 * 1024;

/// Magic number stored in the first word of every host file.
pub const FINGERPRINT: i32 = 912_837_123;

/// Page-layout and file-mapping marker for a free page / free file slot.
pub const UNUSED_PAGE: i32 = -123_456_789;

/// Bytes of page 0 occupied by the preamble (six 32-bit words).
pub const PREAMBLE_LENGTH: u32 = 6 * INT_SIZE as u32;

/// Pages read ahead after a cold cache read.
pub const PREFETCH_DEPTH: u32 = 3;

/// Dirty neighbours flushed together with an evicted dirty slot.
pub const EVICTION_BATCH: u32 = 3;

/// Upper bound on grow-and-retry rounds in page and file-slot allocation.
pub const MAX_GROWTH_ATTEMPTS: usize = 8;

/// Parameters for creating a new filesystem.
///
/// # Example
/// ```
/// use pagefs::FileSystemConfig;
///
/// let config = FileSystemConfig::default()
///     .with_page_size(512)
///     .with_page_count(256);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.cache_slots(), 2048);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystemConfig {
    /// Size of every page in bytes.
    pub page_size: u32,
    /// Initial number of data pages.
    pub page_count: u32,
    /// Cache budget in bytes. Zero disables caching.
    pub cache_size: u32,
}

impl FileSystemConfig {
    pub fn new(page_size: u32, page_count: u32) -> Self {
        Self {
            page_size,
            page_count,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn with_cache_size(mut self, cache_size: u32) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Number of page-sized cache slots this budget buys.
    pub fn cache_slots(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        (self.cache_size / self.page_size) as usize
    }

    /// Number of integers that fit into one page.
    pub fn ints_per_page(&self) -> u32 {
        self.page_size / INT_SIZE as u32
    }

    /// Check the geometry constraints of a new filesystem.
    ///
    /// # Errors
    /// Returns `Error::InvalidGeometry` if the page size or page count is out
    /// of bounds, the page size is not a multiple of the integer width, or the
    /// page count is not a multiple of the integers per page.
    pub fn validate(&self) -> Result<()> {
        let invalid = Error::InvalidGeometry {
            page_size: self.page_size,
            page_count: self.page_count,
        };
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
            || !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&self.page_count)
        {
            return Err(invalid);
        }
        if self.page_size % INT_SIZE as u32 != 0 || self.page_count % self.ints_per_page() != 0 {
            return Err(invalid);
        }
        Ok(())
    }
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_PAGE_COUNT)
    }
}
