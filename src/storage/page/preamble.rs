//! Filesystem preamble stored at the start of page 0.

use crate::common::config::{
    FileSystemConfig, FINGERPRINT, INT_SIZE, MAX_PAGE_COUNT, MAX_PAGE_SIZE, MIN_PAGE_COUNT,
    MIN_PAGE_SIZE, PREAMBLE_LENGTH,
};
use crate::common::{Error, Result};

use super::{read_int, write_int};

/// Geometry header written at offset 0 of the host file.
///
/// # Layout (24 bytes, six little-endian `i32` words)
/// ```text
/// Word  Offset  Field
/// ----  ------  -----
/// 0     0       fingerprint (FINGERPRINT)
/// 1     4       page_size
/// 2     8       page_count (data pages)
/// 3     12      page_layout_size (pages)
/// 4     16      file_mapping_size (pages)
/// 5     20      cache_size (bytes)
/// ```
///
/// The preamble is re-written whenever the page count or the size of one of
/// the tables changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub page_size: u32,
    pub page_count: u32,
    pub page_layout_size: u32,
    pub file_mapping_size: u32,
    pub cache_size: u32,
}

impl Preamble {
    pub const SIZE: usize = PREAMBLE_LENGTH as usize;

    pub const WORD_FINGERPRINT: usize = 0;
    pub const WORD_PAGE_SIZE: usize = 1;
    pub const WORD_PAGE_COUNT: usize = 2;
    pub const WORD_PAGE_LAYOUT_SIZE: usize = 3;
    pub const WORD_FILE_MAPPING_SIZE: usize = 4;
    pub const WORD_CACHE_SIZE: usize = 5;

    /// Preamble for a freshly created filesystem with a one-page mapping table.
    pub fn new(config: &FileSystemConfig) -> Self {
        Self {
            page_size: config.page_size,
            page_count: config.page_count,
            page_layout_size: layout_pages_for(config.page_count, config.page_size),
            file_mapping_size: 1,
            cache_size: config.cache_size,
        }
    }

    /// Total pages of the host file: data pages plus both tables.
    pub fn total_pages(&self) -> u32 {
        self.page_count + self.page_layout_size + self.file_mapping_size
    }

    /// Decode and sanity-check a preamble.
    ///
    /// # Errors
    /// Returns `Error::NotAFileSystem` if the buffer is too short, the
    /// fingerprint does not match, or the geometry is out of bounds.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::NotAFileSystem(format!(
                "preamble truncated to {} bytes",
                data.len()
            )));
        }

        let fingerprint = read_int(data, Self::WORD_FINGERPRINT);
        if fingerprint != FINGERPRINT {
            return Err(Error::NotAFileSystem(format!(
                "fingerprint {fingerprint} does not match"
            )));
        }

        let word = |index: usize| -> Result<u32> {
            u32::try_from(read_int(data, index)).map_err(|_| {
                Error::NotAFileSystem(format!("negative value in preamble word {index}"))
            })
        };

        let preamble = Self {
            page_size: word(Self::WORD_PAGE_SIZE)?,
            page_count: word(Self::WORD_PAGE_COUNT)?,
            page_layout_size: word(Self::WORD_PAGE_LAYOUT_SIZE)?,
            file_mapping_size: word(Self::WORD_FILE_MAPPING_SIZE)?,
            cache_size: word(Self::WORD_CACHE_SIZE)?,
        };
        preamble.check_geometry()?;
        Ok(preamble)
    }

    fn check_geometry(&self) -> Result<()> {
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
            || self.page_size % INT_SIZE as u32 != 0
        {
            return Err(Error::NotAFileSystem(format!(
                "illegal page size {}",
                self.page_size
            )));
        }
        if !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&self.page_count) {
            return Err(Error::NotAFileSystem(format!(
                "illegal page count {}",
                self.page_count
            )));
        }
        if self.page_layout_size != layout_pages_for(self.page_count, self.page_size) {
            return Err(Error::NotAFileSystem(format!(
                "page layout size {} does not cover {} pages",
                self.page_layout_size, self.page_count
            )));
        }
        if self.file_mapping_size == 0 {
            return Err(Error::NotAFileSystem("empty file mapping table".into()));
        }
        Ok(())
    }

    /// Encode into the on-disk representation.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        write_int(&mut bytes, Self::WORD_FINGERPRINT, FINGERPRINT);
        write_int(&mut bytes, Self::WORD_PAGE_SIZE, self.page_size as i32);
        write_int(&mut bytes, Self::WORD_PAGE_COUNT, self.page_count as i32);
        write_int(&mut bytes, Self::WORD_PAGE_LAYOUT_SIZE, self.page_layout_size as i32);
        write_int(&mut bytes, Self::WORD_FILE_MAPPING_SIZE, self.file_mapping_size as i32);
        write_int(&mut bytes, Self::WORD_CACHE_SIZE, self.cache_size as i32);
        bytes
    }
}

/// Number of page-layout pages needed for `page_count` status words.
pub fn layout_pages_for(page_count: u32, page_size: u32) -> u32 {
    let ints_per_page = page_size / INT_SIZE as u32;
    page_count.div_ceil(ints_per_page)
}
