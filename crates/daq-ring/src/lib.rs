#![allow(unsafe_code)]
//! Bucketed ring buffer with one writer and many concurrent readers.
//!
//! A [`RingBuffer<T>`] is a fixed block of `bucket_size * total_buckets`
//! elements split into equal buckets. One producer writes whole buckets while
//! any number of readers copy or borrow ranges of buckets. A range is
//! inclusive and may wrap past the end of the ring (`first > last`).
//!
//! # Claim Protocol
//!
//! Access is granted per bucket through claims, all bookkeeping lives in a
//! single monitor (one mutex, two condition variables):
//!
//! 1. A writer waits until no other write claim exists, announces the bucket
//!    it wants, then waits until no reader holds that bucket.
//! 2. A reader waits while the announced write bucket lies inside its range,
//!    then adds one reference to every bucket in the range.
//! 3. Releasing a write wakes every waiting reader. Releasing a read wakes
//!    the writer once the last reference to its bucket is gone.
//!
//! Because intent and reader admission are decided under the same lock, a
//! reader can never slip into a bucket between the writer's announcement and
//! its wait for the existing readers to drain.
//!
//! An optional claim timeout turns an indefinite wait into
//! [`RingError::ClaimTimeout`].
//!
//! # Guards
//!
//! Claims are taken through RAII guards: [`WriteLock`], [`ReadLock`] and
//! [`IterReadLock`]. Dropping the guard releases the claim, including while
//! unwinding from a panic.
//!
//! # Example
//!
//! ```
//! use daq_ring::RingBuffer;
//!
//! # fn main() -> daq_ring::Result<()> {
//! let ring: RingBuffer<u16> = RingBuffer::try_new(4, 3)?;
//!
//! ring.write(0, &[1, 2, 3, 4])?;
//! ring.write(1, &[5, 6, 7, 8])?;
//!
//! let mut out = vec![0u16; 8];
//! ring.read(0, 1, &mut out)?;
//! assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod guard;

pub use error::{Result, RingError};
pub use guard::{IterReadLock, ReadLock, WriteLock};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Index of a bucket inside a [`RingBuffer`].
pub type Bucket = usize;

/// Claim bookkeeping, guarded by `RingBuffer::claims`.
struct ClaimState {
    /// Bucket announced or held by the writer
    writing: Option<Bucket>,
    /// Reader reference count per bucket
    readers: Vec<usize>,
    /// When each bucket's last write claim was granted
    stamps: Vec<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the claim state.
///
/// Intended for diagnostics and instrumented tests; the state may change as
/// soon as the snapshot is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimSnapshot {
    /// Bucket announced or held by the writer, if any
    pub writing: Option<Bucket>,
    /// Reader reference count per bucket
    pub readers: Vec<usize>,
}

impl ClaimSnapshot {
    /// Number of readers currently holding `bucket`.
    pub fn reader_count(&self, bucket: Bucket) -> usize {
        self.readers.get(bucket).copied().unwrap_or(0)
    }

    /// True when neither a writer nor any reader holds a claim.
    pub fn is_idle(&self) -> bool {
        self.writing.is_none() && self.readers.iter().all(|&n| n == 0)
    }
}

/// Fixed-capacity buffer of equal buckets shared by one writer and many readers.
///
/// # Safety
///
/// Elements live in `UnsafeCell`s and are accessed through raw pointers by the
/// guards. This is sound because:
/// 1. A `WriteLock` on bucket `b` exists only while `writing == Some(b)` and
///    the reader count of `b` is zero
/// 2. A `ReadLock` holds a reference on every bucket of its range, and no
///    writer is admitted to a bucket with a non-zero count
/// 3. At most one write claim exists at a time
/// 4. The backing store is never resized after construction
pub struct RingBuffer<T> {
    /// Contiguous backing store, `bucket_size * total_buckets` elements
    data: Box<[UnsafeCell<T>]>,
    bucket_size: usize,
    total_buckets: usize,
    claims: Mutex<ClaimState>,
    /// Signalled when a write claim is released or withdrawn
    write_done: Condvar,
    /// Signalled when the writer's bucket has no readers left
    read_done: Condvar,
    claim_timeout: Option<Duration>,
}

// SAFETY: RingBuffer is Send+Sync because:
// 1. Element access is serialised by the claim protocol (see type docs)
// 2. T: Send allows the writer thread to hand values to reader threads
// 3. T: Sync allows several readers to borrow the same bucket at once
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocate a ring of `total_buckets` buckets of `bucket_size` elements.
    ///
    /// Allocation failure (including `bucket_size * total_buckets` overflowing)
    /// is reported as [`RingError::OutOfMemory`] instead of aborting.
    ///
    /// # Panics
    /// Panics if `bucket_size` or `total_buckets` is 0.
    pub fn try_new(bucket_size: usize, total_buckets: usize) -> Result<Self> {
        assert!(bucket_size > 0, "bucket size must be greater than 0");
        assert!(total_buckets > 0, "bucket count must be greater than 0");

        let out_of_memory = || RingError::OutOfMemory {
            bucket_size,
            total_buckets,
        };

        let len = bucket_size
            .checked_mul(total_buckets)
            .ok_or_else(out_of_memory)?;

        let mut data: Vec<UnsafeCell<T>> = Vec::new();
        data.try_reserve_exact(len).map_err(|_| out_of_memory())?;
        data.resize_with(len, || UnsafeCell::new(T::default()));

        Ok(Self {
            data: data.into_boxed_slice(),
            bucket_size,
            total_buckets,
            claims: Mutex::new(ClaimState {
                writing: None,
                readers: vec![0; total_buckets],
                stamps: vec![None; total_buckets],
            }),
            write_done: Condvar::new(),
            read_done: Condvar::new(),
            claim_timeout: None,
        })
    }

    /// Copy `data` into `bucket`, blocking until no reader holds it.
    ///
    /// # Panics
    /// Panics if `bucket` is out of range or `data.len() != bucket_size`.
    pub fn write(&self, bucket: Bucket, data: &[T]) -> Result<()> {
        assert_eq!(
            data.len(),
            self.bucket_size,
            "write must supply exactly one bucket of data"
        );
        let mut lock = self.write_lock(bucket)?;
        lock.copy_from_slice(data);
        Ok(())
    }

    /// Copy the inclusive range `first..=last` into `dest`.
    ///
    /// A wrapping range (`first > last`) is copied tail-of-ring first, then
    /// head-of-ring, so `dest` always holds the buckets in range order.
    ///
    /// # Panics
    /// Panics if a bucket is out of range or `dest` is shorter than the range.
    pub fn read(&self, first: Bucket, last: Bucket, dest: &mut [T]) -> Result<()> {
        let count = self.range_len(first, last);
        let len = count * self.bucket_size;
        assert!(
            dest.len() >= len,
            "destination holds {} elements but range {first}..={last} needs {len}",
            dest.len()
        );

        let _lock = self.read_lock(first, last)?;
        if first <= last {
            // SAFETY: every bucket in first..=last holds a read reference
            dest[..len].copy_from_slice(unsafe { self.buckets(first, count) });
        } else {
            let tail_buckets = self.total_buckets - first;
            let tail = tail_buckets * self.bucket_size;
            // SAFETY: both halves lie inside the claimed wrapping range
            unsafe {
                dest[..tail].copy_from_slice(self.buckets(first, tail_buckets));
                dest[tail..len].copy_from_slice(self.buckets(0, last + 1));
            }
        }
        Ok(())
    }
}

impl<T> RingBuffer<T> {
    /// Set the claim timeout (builder form). `None` waits indefinitely.
    #[must_use]
    pub fn with_claim_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Change the claim timeout. `None` waits indefinitely.
    pub fn set_claim_timeout(&mut self, timeout: Option<Duration>) {
        self.claim_timeout = timeout;
    }

    /// Configured claim timeout.
    pub fn claim_timeout(&self) -> Option<Duration> {
        self.claim_timeout
    }

    /// Claim exclusive write access to `bucket`.
    pub fn write_lock(&self, bucket: Bucket) -> Result<WriteLock<'_, T>> {
        WriteLock::acquire(self, bucket)
    }

    /// Claim shared read access to the inclusive range `first..=last`.
    pub fn read_lock(&self, first: Bucket, last: Bucket) -> Result<ReadLock<'_, T>> {
        ReadLock::acquire(self, first, last)
    }

    /// Claim shared read access to `first..=last`, giving up consumed
    /// buckets early while a writer is waiting.
    pub fn iter_read_lock(&self, first: Bucket, last: Bucket) -> Result<IterReadLock<'_, T>> {
        IterReadLock::acquire(self, first, last)
    }

    /// Elements per bucket.
    #[inline]
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Number of buckets.
    #[inline]
    pub fn total_buckets(&self) -> usize {
        self.total_buckets
    }

    /// Bucket following `bucket`, wrapping to 0.
    pub fn next_bucket(&self, bucket: Bucket) -> Bucket {
        self.check_bucket(bucket);
        (bucket + 1) % self.total_buckets
    }

    /// Bucket preceding `bucket`, wrapping to the last one.
    pub fn prev_bucket(&self, bucket: Bucket) -> Bucket {
        self.check_bucket(bucket);
        if bucket == 0 {
            self.total_buckets - 1
        } else {
            bucket - 1
        }
    }

    /// Whether `bucket` lies in the inclusive, possibly wrapping range.
    pub fn bucket_in_range(&self, bucket: Bucket, first: Bucket, last: Bucket) -> bool {
        self.check_bucket(first);
        self.check_bucket(last);
        if first <= last {
            (first..=last).contains(&bucket)
        } else {
            bucket >= first || bucket <= last
        }
    }

    /// Number of buckets in the inclusive, possibly wrapping range.
    pub fn range_len(&self, first: Bucket, last: Bucket) -> usize {
        self.check_bucket(first);
        self.check_bucket(last);
        if first <= last {
            last - first + 1
        } else {
            self.total_buckets - first + last + 1
        }
    }

    /// Snapshot of the current claims.
    pub fn claims(&self) -> ClaimSnapshot {
        let state = self.claims.lock();
        ClaimSnapshot {
            writing: state.writing,
            readers: state.readers.clone(),
        }
    }

    fn check_bucket(&self, bucket: Bucket) {
        assert!(
            bucket < self.total_buckets,
            "bucket {bucket} out of range (ring has {} buckets)",
            self.total_buckets
        );
    }

    fn range(&self, first: Bucket, last: Bucket) -> impl Iterator<Item = Bucket> {
        let total = self.total_buckets;
        (0..self.range_len(first, last)).map(move |i| (first + i) % total)
    }

    /// Pointer to the first element of `bucket`.
    fn bucket_ptr(&self, bucket: Bucket) -> *mut T {
        // UnsafeCell<T> is repr(transparent), so the cells form a plain T array
        UnsafeCell::raw_get(self.data.as_ptr()).wrapping_add(bucket * self.bucket_size)
    }

    /// Borrow `count` consecutive buckets starting at `first`.
    ///
    /// # Safety
    /// The caller must hold a read or write claim on every bucket borrowed,
    /// and `first + count <= total_buckets`.
    pub(crate) unsafe fn buckets(&self, first: Bucket, count: usize) -> &[T] {
        debug_assert!(first + count <= self.total_buckets);
        std::slice::from_raw_parts(self.bucket_ptr(first), count * self.bucket_size)
    }

    /// Mutably borrow one bucket.
    ///
    /// # Safety
    /// The caller must hold the write claim on `bucket`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bucket_mut(&self, bucket: Bucket) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.bucket_ptr(bucket), self.bucket_size)
    }

    pub(crate) fn bucket_time(&self, bucket: Bucket) -> Option<DateTime<Utc>> {
        self.claims.lock().stamps[bucket]
    }

    /// Wait on `condvar`, returning `false` once `deadline` has passed.
    fn wait(
        condvar: &Condvar,
        state: &mut MutexGuard<'_, ClaimState>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => !condvar.wait_until(state, deadline).timed_out(),
            None => {
                condvar.wait(state);
                true
            }
        }
    }

    fn timeout_error(&self, first: Bucket, last: Bucket) -> RingError {
        let timeout = self.claim_timeout.unwrap_or_default();
        warn!(
            first,
            last,
            timeout_ms = timeout.as_millis(),
            "Claim timeout - ring buffer contention"
        );
        RingError::ClaimTimeout {
            first,
            last,
            timeout,
        }
    }

    pub(crate) fn begin_write(&self, bucket: Bucket) -> Result<()> {
        self.check_bucket(bucket);
        let deadline = self.claim_timeout.map(|t| Instant::now() + t);
        let mut state = self.claims.lock();

        // Single writer: queue behind any other write claim
        while state.writing.is_some() {
            if !Self::wait(&self.write_done, &mut state, deadline) && state.writing.is_some() {
                return Err(self.timeout_error(bucket, bucket));
            }
        }

        // From here on no new reader of `bucket` is admitted
        state.writing = Some(bucket);

        while state.readers[bucket] != 0 {
            if !Self::wait(&self.read_done, &mut state, deadline) && state.readers[bucket] != 0 {
                state.writing = None;
                drop(state);
                self.write_done.notify_all();
                return Err(self.timeout_error(bucket, bucket));
            }
        }

        state.stamps[bucket] = Some(Utc::now());
        trace!(bucket, "write claim granted");
        Ok(())
    }

    pub(crate) fn end_write(&self, bucket: Bucket) {
        let mut state = self.claims.lock();
        debug_assert_eq!(state.writing, Some(bucket));
        state.writing = None;
        drop(state);
        self.write_done.notify_all();
        trace!(bucket, "write claim released");
    }

    pub(crate) fn begin_read(&self, first: Bucket, last: Bucket) -> Result<()> {
        self.check_bucket(first);
        self.check_bucket(last);
        let deadline = self.claim_timeout.map(|t| Instant::now() + t);
        let mut state = self.claims.lock();

        let blocked = |state: &ClaimState| {
            state
                .writing
                .is_some_and(|w| self.bucket_in_range(w, first, last))
        };
        while blocked(&*state) {
            if !Self::wait(&self.write_done, &mut state, deadline) && blocked(&*state) {
                return Err(self.timeout_error(first, last));
            }
        }

        for bucket in self.range(first, last) {
            state.readers[bucket] += 1;
        }
        trace!(first, last, "read claim granted");
        Ok(())
    }

    pub(crate) fn end_read(&self, first: Bucket, last: Bucket) {
        let mut state = self.claims.lock();
        let wake = self.release_read(&mut state, first, last);
        drop(state);
        if wake {
            self.read_done.notify_one();
        }
        trace!(first, last, "read claim released");
    }

    /// Release `first..=prev` if a writer is waiting. Returns whether it did.
    pub(crate) fn release_prefix_if_contended(&self, first: Bucket, prev: Bucket) -> bool {
        let mut state = self.claims.lock();
        if state.writing.is_none() {
            return false;
        }
        let wake = self.release_read(&mut state, first, prev);
        drop(state);
        if wake {
            self.read_done.notify_one();
        }
        trace!(first, prev, "released consumed prefix for waiting writer");
        true
    }

    /// Drop one reference on every bucket in the range. Returns whether the
    /// waiting writer's bucket has just become free.
    fn release_read(&self, state: &mut ClaimState, first: Bucket, last: Bucket) -> bool {
        for bucket in self.range(first, last) {
            debug_assert!(state.readers[bucket] > 0, "bucket {bucket} not held");
            state.readers[bucket] -= 1;
        }
        state
            .writing
            .is_some_and(|w| self.bucket_in_range(w, first, last) && state.readers[w] == 0)
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("bucket_size", &self.bucket_size)
            .field("total_buckets", &self.total_buckets)
            .field("claim_timeout", &self.claim_timeout)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let state = self.claims.get_mut();
        debug_assert!(
            state.writing.is_none(),
            "ring buffer dropped with an outstanding write claim"
        );
        debug_assert!(
            state.readers.iter().all(|&n| n == 0),
            "ring buffer dropped with outstanding read claims"
        );
    }
}
