//! Randomized stress test of the writer/reader claim protocol.
//!
//! One writer fills buckets in order with a per-write marker value while
//! several readers claim random ranges. Every claim checks the protocol from
//! the inside:
//! - the writer never holds a bucket that a reader references
//! - a reader never observes a partially written (torn) bucket

use daq_ring::RingBuffer;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const BUCKET_SIZE: usize = 64;
const TOTAL_BUCKETS: usize = 8;
const READERS: usize = 4;
const WRITES: u32 = 2_000;

#[test]
fn test_random_claims_never_overlap() {
    let ring: Arc<RingBuffer<u32>> =
        Arc::new(RingBuffer::try_new(BUCKET_SIZE, TOTAL_BUCKETS).unwrap());
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !done.load(Ordering::Acquire) {
                    let first = rng.gen_range(0..TOTAL_BUCKETS);
                    let last = rng.gen_range(0..TOTAL_BUCKETS);
                    let lock = ring.read_lock(first, last).unwrap();

                    let snapshot = ring.claims();
                    for (bucket, data) in lock.buckets() {
                        assert!(snapshot.reader_count(bucket) >= 1);
                        assert!(
                            data.iter().all(|&v| v == data[0]),
                            "torn read in bucket {bucket}"
                        );
                    }

                    if rng.gen_bool(0.2) {
                        thread::sleep(Duration::from_micros(rng.gen_range(10..200)));
                    }
                    drop(lock);
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let mut bucket = 0;
    for marker in 1..=WRITES {
        let mut lock = ring.write_lock(bucket).unwrap();

        let snapshot = ring.claims();
        assert_eq!(snapshot.writing, Some(bucket));
        assert_eq!(snapshot.reader_count(bucket), 0);

        for (i, value) in lock.iter_mut().enumerate() {
            *value = marker;
            if i == BUCKET_SIZE / 2 {
                thread::yield_now();
            }
        }
        drop(lock);
        bucket = ring.next_bucket(bucket);
    }

    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(reads.load(Ordering::Relaxed) > 0);
    assert!(ring.claims().is_idle());
}

#[test]
fn test_iterating_reader_does_not_starve_writer() {
    let ring: Arc<RingBuffer<u32>> = Arc::new(
        RingBuffer::try_new(BUCKET_SIZE, TOTAL_BUCKETS)
            .unwrap()
            .with_claim_timeout(Some(Duration::from_secs(5))),
    );
    let released = Arc::new(AtomicBool::new(false));

    let mut lock = ring.iter_read_lock(0, TOTAL_BUCKETS - 1).unwrap();

    let writer = {
        let ring = Arc::clone(&ring);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            ring.write(0, &[7; BUCKET_SIZE]).unwrap();
            released.store(true, Ordering::SeqCst);
        })
    };

    while ring.claims().writing != Some(0) {
        thread::sleep(Duration::from_millis(1));
    }

    // Consume slowly; the writer gets bucket 0 as soon as we move past it
    let mut bucket = lock.first();
    while let Some(next) = lock.iterate(bucket) {
        bucket = next;
        thread::sleep(Duration::from_millis(2));
    }
    writer.join().unwrap();
    assert!(released.load(Ordering::SeqCst));
    assert!(!lock.contains(0));
    drop(lock);
    assert!(ring.claims().is_idle());
}
