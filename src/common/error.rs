//! Error types for the paged filesystem.

use thiserror::Error;

use crate::common::{FileHandle, PageId};

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors reported by the filesystem, its cache and file objects.
///
/// A cache miss is not an error: only the strict cache accessors
/// (`get_page`, `touch_page`) report [`Error::NotCached`].
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the host file (short read/write, truncate failure).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Page size or page count violates the geometry constraints.
    #[error("Illegal page size/page count: {page_size}/{page_count}")]
    InvalidGeometry { page_size: u32, page_count: u32 },

    /// The host file does not carry a valid preamble.
    #[error("Not a paged filesystem: {0}")]
    NotAFileSystem(String),

    /// Page number or byte range lies outside the host file.
    #[error("{0} is out of range")]
    PageOutOfRange(PageId),

    /// The file-mapping slot is free.
    #[error("{0} does not exist")]
    FileNotFound(FileHandle),

    /// The requested file-mapping slot is already occupied.
    #[error("{0} already exists")]
    FileExists(FileHandle),

    /// Growing would exceed the maximum page count.
    #[error("Filesystem cannot grow beyond {requested} pages")]
    CapacityExceeded { requested: u64 },

    /// `change_size` target is below the minimum, below the used page count,
    /// or above the maximum.
    #[error("Cannot resize filesystem to {requested} pages: {reason}")]
    InvalidSize { requested: u32, reason: &'static str },

    /// Seek position is negative or beyond the end of the file.
    #[error("Seek position {pos} outside of file of size {size}")]
    SeekOutOfRange { pos: u64, size: u64 },

    /// Strict cache access to a page that is not resident.
    #[error("{0} is not cached")]
    NotCached(PageId),

    /// On-disk structures are inconsistent (broken chain, count mismatch).
    #[error("Filesystem corrupted: {0}")]
    Corrupted(String),

    /// A structural operation failed half-way; the filesystem is unusable.
    #[error("Filesystem is inactive")]
    Inactive,
}
