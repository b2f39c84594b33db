//! Storage layer - host file I/O and on-disk formats.
//!
//! This module handles persistent storage:
//! - [`PageStore`] - Positional page I/O on the host file
//! - [`page`] - Preamble and page-layout table encodings

pub mod page;
mod page_store;

pub use page_store::PageStore;
