//! Common types shared across the filesystem.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`FileSystemConfig`]
//! - Error types
//! - Identifiers (PageId, FileHandle)

pub mod config;
pub mod error;
mod file_handle;
mod page_id;

pub use config::FileSystemConfig;
pub use error::{Error, Result};
pub use file_handle::FileHandle;
pub use page_id::PageId;
