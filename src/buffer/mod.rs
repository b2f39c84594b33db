//! Page cache.
//!
//! The cache sits between the filesystem and the page store. It keeps a
//! bounded number of page buffers, coalesces partial writes and reads ahead
//! on cold reads.
//!
//! # Components
//! - [`FileSystemCache`] - The page cache itself
//! - [`CacheSlot`] - One resident page plus its dirty flag
//! - [`IoStats`] - Shared I/O and hit/miss counters
//! - [`replacer`] - Eviction order and policy

mod cache;
pub mod replacer;
mod slot;
mod stats;

pub use cache::FileSystemCache;
pub use replacer::EvictionPolicy;
pub use slot::CacheSlot;
pub use stats::{IoStats, IoStatsSnapshot};
