//! On-disk formats.
//!
//! This module contains:
//! - [`Preamble`] - Geometry header at the start of page 0
//! - [`PageStatus`] - Decoded page-layout table entry
//! - Helpers for the little-endian 32-bit words every table is made of

mod preamble;
mod status;

pub use preamble::{layout_pages_for, Preamble};
pub use status::PageStatus;

use crate::common::config::INT_SIZE;

/// Read the `index`-th 32-bit word of a buffer.
///
/// # Panics
/// Panics if the word lies outside `data`.
#[inline]
pub fn read_int(data: &[u8], index: usize) -> i32 {
    let start = index * INT_SIZE;
    let mut word = [0u8; INT_SIZE];
    word.copy_from_slice(&data[start..start + INT_SIZE]);
    i32::from_le_bytes(word)
}

/// Write the `index`-th 32-bit word of a buffer.
///
/// # Panics
/// Panics if the word lies outside `data`.
#[inline]
pub fn write_int(data: &mut [u8], index: usize, value: i32) {
    let start = index * INT_SIZE;
    data[start..start + INT_SIZE].copy_from_slice(&value.to_le_bytes());
}

/// A page buffer where every word holds `value`.
pub fn filled_page(page_size: u32, value: i32) -> Vec<u8> {
    value
        .to_le_bytes()
        .iter()
        .copied()
        .cycle()
        .take(page_size as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_words() {
        let mut data = [0u8; 16];
        write_int(&mut data, 2, -5);
        assert_eq!(read_int(&data, 2), -5);
        assert_eq!(read_int(&data, 1), 0);
        assert_eq!(&data[8..12], &(-5i32).to_le_bytes());
    }

    #[test]
    fn test_filled_page() {
        let page = filled_page(128, 0x0102_0304);
        assert_eq!(page.len(), 128);
        assert!((0..32).all(|i| read_int(&page, i) == 0x0102_0304));
    }
}
