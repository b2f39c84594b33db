//! The paged virtual filesystem.
//!
//! - [`FileSystem`] - Host file handle, allocation and structural operations
//! - [`FsCore`] - Lock-protected tables and page I/O
//! - [`FileObject`] - Byte-level cursor over one file

mod file_object;
mod filesystem;

pub use file_object::FileObject;
pub use filesystem::{FileSystem, FsCore};
