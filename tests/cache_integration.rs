//! Integration tests for the page cache behind a filesystem.
//!
//! These tests verify cache/disk coherence and the bounds the cache keeps,
//! observed through the public filesystem API and the raw host file.

use std::io::{Read, Seek, SeekFrom};

use pagefs::{EvictionPolicy, FileObject, FileSystem, FileSystemConfig, PageId};
use tempfile::{tempdir, TempDir};

const PAGE: u32 = 256;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cached_len(fs: &FileSystem) -> usize {
    fs.with_core(|core| Ok(core.cache().map_or(0, |cache| cache.len())))
        .unwrap()
}

fn create_fs(cache_pages: u32) -> (FileSystem, TempDir) {
    init_tracing();
    let dir = tempdir().unwrap();
    let config = FileSystemConfig::new(PAGE, 128).with_cache_size(cache_pages * PAGE);
    let fs = FileSystem::create(dir.path().join("cache.fs"), config).unwrap();
    (fs, dir)
}

/// Read a byte range of a page straight from the host file.
fn raw_read(fs: &FileSystem, page: PageId, offset: u32, len: usize) -> Vec<u8> {
    let mut file = std::fs::File::open(fs.path()).unwrap();
    file.seek(SeekFrom::Start(page.0 as u64 * PAGE as u64 + offset as u64))
        .unwrap();
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).unwrap();
    buf
}

/// A write is visible to the next read whether caching is on or off, and a
/// flush makes it visible on disk.
#[test]
fn test_write_then_read_coherent() {
    let (fs, _dir) = create_fs(8);

    fs.write_page_range(PageId::new(10), 17, b"cached bytes").unwrap();
    let mut out = [0u8; 12];
    fs.read_page_range(PageId::new(10), 17, &mut out).unwrap();
    assert_eq!(&out, b"cached bytes");
    assert!(fs.is_cached(PageId::new(10)));

    fs.flush_cache().unwrap();
    assert_eq!(cached_len(&fs), 0);
    assert_eq!(raw_read(&fs, PageId::new(10), 17, 12), b"cached bytes");

    fs.disable_caching().unwrap();
    fs.write_page_range(PageId::new(11), 0, b"direct").unwrap();
    let mut out = [0u8; 6];
    fs.read_page_range(PageId::new(11), 0, &mut out).unwrap();
    assert_eq!(&out, b"direct");
    assert_eq!(raw_read(&fs, PageId::new(11), 0, 6), b"direct");
}

#[test]
fn test_full_page_round_trip() {
    let (fs, _dir) = create_fs(8);
    let data: Vec<u8> = (0..PAGE).map(|i| (i % 256) as u8).collect();

    fs.write_page(PageId::new(20), &data).unwrap();
    let mut out = vec![0u8; PAGE as usize];
    fs.read_page(PageId::new(20), &mut out).unwrap();
    assert_eq!(out, data);
}

/// Dirty pages evicted to make room reach the disk.
#[test]
fn test_eviction_writes_back() {
    let (fs, _dir) = create_fs(4);

    for page in 1..40u32 {
        fs.write_page_range(PageId::new(page), 0, &page.to_le_bytes())
            .unwrap();
        assert!(cached_len(&fs) <= 4);
    }
    // Early pages have been evicted and must be on disk already
    assert_eq!(raw_read(&fs, PageId::new(1), 0, 4), 1u32.to_le_bytes());
    assert_eq!(raw_read(&fs, PageId::new(2), 0, 4), 2u32.to_le_bytes());

    for page in 1..40u32 {
        let mut out = [0u8; 4];
        fs.read_page_range(PageId::new(page), 0, &mut out).unwrap();
        assert_eq!(u32::from_le_bytes(out), page);
    }
}

/// The cache never holds more slots than its budget, whatever the access
/// pattern and policy.
#[test]
fn test_eviction_bound() {
    for policy in [EvictionPolicy::Lru, EvictionPolicy::Fifo] {
        let (fs, _dir) = create_fs(6);
        fs.set_eviction_policy(policy).unwrap();

        let file = FileObject::create(&fs).unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        for piece in data.chunks(333) {
            file.write(piece).unwrap();
            assert!(cached_len(&fs) <= 6);
        }

        let mut buf = [0u8; 50];
        for i in 0..200u64 {
            let pos = (i * 7919) % 19_900;
            file.seek_and_read(pos, &mut buf).unwrap();
            assert_eq!(&buf[..], &data[pos as usize..pos as usize + 50]);
            assert!(cached_len(&fs) <= 6);
        }
    }
}

/// Logical reads and writes are counted separately from host file I/O.
#[test]
fn test_cache_efficiency_counters() {
    let (fs, _dir) = create_fs(16);
    fs.stats().reset();

    fs.write_page_range(PageId::new(5), 0, b"abcd").unwrap();
    let mut out = [0u8; 4];
    for _ in 0..10 {
        fs.read_page_range(PageId::new(5), 0, &mut out).unwrap();
    }

    let stats = fs.cache_efficiency();
    assert_eq!(stats.reads, 10);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.cache_hits, 10);
    assert_eq!(stats.cache_misses, 1);
    // One page load for the partial write, nothing else
    assert_eq!(stats.uncached_reads, 1);
    assert_eq!(stats.uncached_writes, 0);
    assert!(stats.hit_rate() > 0.9);
    assert!(stats.to_string().starts_with("Cache efficiency"));
}

/// Closing the filesystem flushes dirty pages.
#[test]
fn test_drop_flushes_cache() {
    let (fs, dir) = create_fs(32);
    let path = dir.path().join("cache.fs");
    let handle = {
        let file = FileObject::create(&fs).unwrap();
        file.write(b"kept across close").unwrap();
        file.handle()
    };
    let dirty = fs
        .with_core(|core| Ok(core.cache().map_or(0, |cache| cache.dirty_count())))
        .unwrap();
    assert!(dirty > 0);
    drop(fs);

    let fs = FileSystem::open(path).unwrap();
    let file = FileObject::open(&fs, handle).unwrap();
    assert_eq!(file.read_vec(100).unwrap(), b"kept across close");
}

#[test]
fn test_sync_empties_cache() {
    let (fs, _dir) = create_fs(8);
    fs.write_page_range(PageId::new(3), 0, b"sync").unwrap();

    fs.sync().unwrap();
    assert!(!fs.is_cached(PageId::new(3)));
    assert_eq!(raw_read(&fs, PageId::new(3), 0, 4), b"sync");
}
