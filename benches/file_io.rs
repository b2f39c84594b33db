//! FileObject I/O benchmarks.
//!
//! Sequential writes in small increments stress page claiming and write
//! coalescing; sequential and scattered reads stress the cache and its
//! read-ahead.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pagefs::{EvictionPolicy, FileObject, FileSystem, FileSystemConfig};
use tempfile::tempdir;

const PAGE_SIZE: u32 = 1024;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn bench_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_write");

    for chunk in [64usize, 373, 4096] {
        let total = 256 * 1024;
        group.throughput(Throughput::Bytes(total as u64));
        group.bench_with_input(BenchmarkId::new("sequential", chunk), &chunk, |b, &chunk| {
            let data = payload(total);
            b.iter_with_setup(
                || {
                    let dir = tempdir().unwrap();
                    let config = FileSystemConfig::new(PAGE_SIZE, 1024);
                    let fs = FileSystem::create(dir.path().join("bench.fs"), config).unwrap();
                    (dir, fs)
                },
                |(dir, fs)| {
                    {
                        let file = FileObject::create(&fs).unwrap();
                        for piece in data.chunks(chunk) {
                            file.write(piece).unwrap();
                        }
                    }
                    (dir, fs)
                },
            );
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_read");
    let total = 512 * 1024;

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Fifo] {
        let dir = tempdir().unwrap();
        let config = FileSystemConfig::new(PAGE_SIZE, 1024).with_cache_size(64 * PAGE_SIZE);
        let fs = FileSystem::create(dir.path().join("bench.fs"), config).unwrap();
        fs.set_eviction_policy(policy).unwrap();
        let file = FileObject::create(&fs).unwrap();
        file.write(&payload(total)).unwrap();

        group.throughput(Throughput::Bytes(total as u64));
        group.bench_function(BenchmarkId::new("sequential", format!("{policy:?}")), |b| {
            let mut buf = vec![0u8; 4096];
            b.iter(|| {
                file.seek(0).unwrap();
                while file.read(&mut buf).unwrap() > 0 {
                    black_box(&buf);
                }
            });
        });

        group.throughput(Throughput::Elements(1000));
        group.bench_function(BenchmarkId::new("scattered", format!("{policy:?}")), |b| {
            let mut buf = [0u8; 128];
            b.iter(|| {
                for i in 0..1000u64 {
                    let pos = (i * 104_729) % (total as u64 - 128);
                    black_box(file.seek_and_read(pos, &mut buf).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_write, bench_read);
criterion_main!(benches);
