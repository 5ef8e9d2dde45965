//! Criterion benchmarks for bucket ring hot paths.
//!
//! Key metrics:
//! - Bucket write throughput for typical acquisition bucket sizes
//! - Range read (copy) latency, contiguous and wrapping
//! - Claim overhead with concurrent readers
//!
//! Run with: cargo bench -p daq-ring --bench ring_throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daq_ring::RingBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Benchmark writing one bucket of samples.
fn bucket_write_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_write");

    let sizes = vec![("1K", 1024), ("4K", 4096), ("64K", 64 * 1024)];

    for (name, size) in sizes {
        let ring: RingBuffer<u16> = RingBuffer::try_new(size, 16).unwrap();
        let data = vec![0x5A5Au16; size];
        let mut bucket = 0;

        group.throughput(Throughput::Bytes((size * 2) as u64));
        group.bench_with_input(BenchmarkId::new("write", name), &size, |b, _| {
            b.iter(|| {
                ring.write(black_box(bucket), black_box(&data)).unwrap();
                bucket = ring.next_bucket(bucket);
            });
        });
    }

    group.finish();
}

/// Benchmark copying a range of buckets out of the ring.
fn range_read_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_read");

    let ring: RingBuffer<u16> = RingBuffer::try_new(4096, 16).unwrap();
    let mut out = vec![0u16; 4 * 4096];

    group.throughput(Throughput::Bytes((out.len() * 2) as u64));
    group.bench_function("contiguous", |b| {
        b.iter(|| {
            ring.read(black_box(4), black_box(7), &mut out).unwrap();
        });
    });
    group.bench_function("wrapping", |b| {
        b.iter(|| {
            ring.read(black_box(14), black_box(1), &mut out).unwrap();
        });
    });

    group.finish();
}

/// Benchmark the writer while readers keep claiming other buckets.
fn contended_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_write");

    for readers in [1usize, 2, 4] {
        let ring: Arc<RingBuffer<u16>> = Arc::new(RingBuffer::try_new(1024, 16).unwrap());
        let stop = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..readers)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut out = vec![0u16; 4 * 1024];
                    while !stop.load(Ordering::Relaxed) {
                        ring.read(8, 11, &mut out).unwrap();
                    }
                })
            })
            .collect();

        let data = vec![1u16; 1024];
        group.bench_with_input(
            BenchmarkId::new("write_with_readers", readers),
            &readers,
            |b, _| {
                b.iter(|| {
                    ring.write(black_box(0), &data).unwrap();
                });
            },
        );

        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bucket_write_throughput,
    range_read_latency,
    contended_write
);
criterion_main!(benches);
