//! I/O and cache statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the filesystem, its cache and the page store.
///
/// All fields are atomic so they can be read without taking the filesystem
/// lock. `Ordering::Relaxed` is enough: counters are independent and only
/// need atomicity.
///
/// # Example
/// ```
/// use pagefs::IoStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = IoStats::new();
/// stats.reads.fetch_add(4, Ordering::Relaxed);
/// stats.uncached_reads.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().reads, 4);
/// ```
#[derive(Debug)]
pub struct IoStats {
    /// Logical page reads requested through the filesystem.
    pub reads: AtomicU64,

    /// Positional reads issued against the host file.
    pub uncached_reads: AtomicU64,

    /// Logical page writes requested through the filesystem.
    pub writes: AtomicU64,

    /// Positional writes issued against the host file.
    pub uncached_writes: AtomicU64,

    /// Cache lookups that found the page resident.
    pub cache_hits: AtomicU64,

    /// Cache lookups that had to go to the host file.
    pub cache_misses: AtomicU64,

    /// Slots removed from the cache.
    pub evictions: AtomicU64,
}

impl IoStats {
    pub fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            uncached_reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            uncached_writes: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Non-atomic copy for display/logging.
    pub fn snapshot(&self) -> IoStatsSnapshot {
        IoStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            uncached_reads: self.uncached_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            uncached_writes: self.uncached_writes.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.uncached_reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.uncached_writes.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

impl Default for IoStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of [`IoStats`], as returned by
/// `FileSystem::cache_efficiency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStatsSnapshot {
    pub reads: u64,
    pub uncached_reads: u64,
    pub writes: u64,
    pub uncached_writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
}

impl IoStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for IoStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cache efficiency {{ reads: {}/{}, writes: {}/{}, evictions: {}, hit_rate: {:.2}% }}",
            self.uncached_reads,
            self.reads,
            self.uncached_writes,
            self.writes,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = IoStats::new();
        assert_eq!(stats.snapshot(), IoStatsSnapshot::default());
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = IoStats::new();
        stats.cache_hits.fetch_add(7, Ordering::Relaxed);
        stats.cache_misses.fetch_add(3, Ordering::Relaxed);

        assert_eq!(stats.hit_rate(), 0.7);
        assert_eq!(stats.snapshot().hit_rate(), 0.7);
    }

    #[test]
    fn test_stats_reset() {
        let stats = IoStats::new();
        IoStats::bump(&stats.writes);
        IoStats::bump(&stats.evictions);

        stats.reset();

        assert_eq!(stats.snapshot(), IoStatsSnapshot::default());
    }

    #[test]
    fn test_stats_display() {
        let stats = IoStats::new();
        stats.reads.fetch_add(100, Ordering::Relaxed);
        stats.uncached_reads.fetch_add(20, Ordering::Relaxed);
        stats.cache_hits.fetch_add(80, Ordering::Relaxed);
        stats.cache_misses.fetch_add(20, Ordering::Relaxed);

        let display = format!("{}", stats.snapshot());

        assert!(display.contains("reads: 20/100"));
        assert!(display.contains("80.00%"));
    }
}
