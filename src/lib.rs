//! pagefs - A paged virtual filesystem inside a single host file.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            pagefs                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                FileObject (fs/)                          │   │
//! │  │      byte cursor: seek / read / write over a chain       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                FileSystem (fs/)                          │   │
//! │  │   page-layout table + file-mapping table + free counts   │   │
//! │  │   create/delete files, grow/shrink, defragment           │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │            FileSystemCache (buffer/)                     │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │       Eviction Policies: LRU | FIFO             │   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  │   write coalescing, read-ahead, batched write-back       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │               PageStore (storage/)                       │   │
//! │  │      positional page I/O + Preamble + PageStatus         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FileHandle, Error, config)
//! - [`buffer`] - Page cache and eviction policies
//! - [`storage`] - Host file I/O and on-disk formats
//! - [`fs`] - FileSystem and FileObject
//!
//! # Quick Start
//! ```no_run
//! use pagefs::{FileObject, FileSystem, FileSystemConfig};
//!
//! // Create a new filesystem with 1 KiB pages
//! let fs = FileSystem::create("index.fs", FileSystemConfig::new(1024, 1024)).unwrap();
//!
//! // Create a file and write to it
//! let file = FileObject::create(&fs).unwrap();
//! file.write(b"posting list").unwrap();
//! let handle = file.handle();
//! drop(file);
//! drop(fs);
//!
//! // Reopen and read it back
//! let fs = FileSystem::open("index.fs").unwrap();
//! let file = FileObject::open(&fs, handle).unwrap();
//! assert_eq!(file.read_vec(64).unwrap(), b"posting list");
//! ```

pub mod buffer;
pub mod common;
pub mod fs;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{Error, FileHandle, FileSystemConfig, PageId, Result};

pub use buffer::{EvictionPolicy, FileSystemCache, IoStats, IoStatsSnapshot};
pub use fs::{FileObject, FileSystem, FsCore};
pub use storage::page::PageStatus;
pub use storage::PageStore;
