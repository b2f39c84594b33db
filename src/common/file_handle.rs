//! File handle type.

use std::fmt;

/// Identifies a logical file: an index into the file-mapping table.
///
/// # Example
/// ```
/// use pagefs::FileHandle;
///
/// let handle = FileHandle::new(5);
/// assert_eq!(handle.index(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub u32);

impl FileHandle {
    #[inline]
    pub fn new(id: u32) -> Self {
        FileHandle(id)
    }

    /// Slot index inside the file-mapping table.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_handle_equality() {
        assert_eq!(FileHandle::new(5), FileHandle::new(5));
        assert_ne!(FileHandle::new(5), FileHandle::new(6));
    }

    #[test]
    fn test_file_handle_display() {
        assert_eq!(format!("{}", FileHandle::new(42)), "File(42)");
    }
}
