//! RAII claim guards for [`RingBuffer`].
//!
//! Every guard releases its claim in `Drop`, so a panic while a bucket is held
//! (a failed copy, an assertion in a consumer) never leaves the ring wedged.

use chrono::{DateTime, Utc};
use std::ops::{Deref, DerefMut};

use crate::{Bucket, Result, RingBuffer};

/// Exclusive access to one bucket.
///
/// Dereferences to the bucket's elements. The write claim is released when
/// the guard is dropped.
pub struct WriteLock<'a, T> {
    ring: &'a RingBuffer<T>,
    bucket: Bucket,
}

impl<'a, T> WriteLock<'a, T> {
    pub(crate) fn acquire(ring: &'a RingBuffer<T>, bucket: Bucket) -> Result<Self> {
        ring.begin_write(bucket)?;
        Ok(Self { ring, bucket })
    }

    /// Bucket held by this guard.
    #[inline]
    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    /// Borrow the bucket's elements.
    #[inline]
    pub fn get(&self) -> &[T] {
        // SAFETY: we hold the only write claim on self.bucket and no reader
        // holds it (see RingBuffer safety docs)
        unsafe { self.ring.buckets(self.bucket, 1) }
    }

    /// Mutably borrow the bucket's elements.
    #[inline]
    pub fn get_mut(&mut self) -> &mut [T] {
        // SAFETY: as for get(); &mut self prevents aliasing through this guard
        unsafe { self.ring.bucket_mut(self.bucket) }
    }
}

impl<T> Deref for WriteLock<'_, T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T> DerefMut for WriteLock<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T> Drop for WriteLock<'_, T> {
    fn drop(&mut self) {
        self.ring.end_write(self.bucket);
    }
}

/// Shared access to an inclusive, possibly wrapping range of buckets.
#[derive(Debug)]
pub struct ReadLock<'a, T> {
    ring: &'a RingBuffer<T>,
    first: Bucket,
    last: Bucket,
}

impl<'a, T> ReadLock<'a, T> {
    pub(crate) fn acquire(ring: &'a RingBuffer<T>, first: Bucket, last: Bucket) -> Result<Self> {
        ring.begin_read(first, last)?;
        Ok(Self { ring, first, last })
    }

    /// First bucket of the held range.
    #[inline]
    pub fn first(&self) -> Bucket {
        self.first
    }

    /// Last bucket of the held range.
    #[inline]
    pub fn last(&self) -> Bucket {
        self.last
    }

    /// Number of buckets in the held range.
    pub fn total(&self) -> usize {
        self.ring.range_len(self.first, self.last)
    }

    /// Whether `bucket` is inside the held range.
    pub fn contains(&self, bucket: Bucket) -> bool {
        self.ring.bucket_in_range(bucket, self.first, self.last)
    }

    /// Borrow one bucket of the held range.
    ///
    /// # Panics
    /// Panics if `bucket` is outside the held range.
    pub fn get(&self, bucket: Bucket) -> &[T] {
        assert!(
            self.contains(bucket),
            "bucket {bucket} outside read claim {}..={}",
            self.first,
            self.last
        );
        // SAFETY: bucket holds one of our read references, so no writer is
        // admitted until this guard is dropped
        unsafe { self.ring.buckets(bucket, 1) }
    }

    /// When `bucket` was last claimed for writing, if ever.
    pub fn time(&self, bucket: Bucket) -> Option<DateTime<Utc>> {
        self.ring.bucket_time(bucket)
    }

    /// Bucket after `bucket` within the held range, or `None` at the end.
    pub fn iterate(&self, bucket: Bucket) -> Option<Bucket> {
        if bucket == self.last {
            None
        } else {
            Some(self.ring.next_bucket(bucket))
        }
    }

    /// Iterate the held buckets in range order.
    pub fn buckets(&self) -> impl Iterator<Item = (Bucket, &[T])> + '_ {
        let total = self.ring.total_buckets();
        (0..self.total()).map(move |i| {
            let bucket = (self.first + i) % total;
            (bucket, self.get(bucket))
        })
    }
}

impl<T> Drop for ReadLock<'_, T> {
    fn drop(&mut self) {
        self.ring.end_read(self.first, self.last);
    }
}

/// A [`ReadLock`] that gives consumed buckets back early.
///
/// Each call to [`iterate`](Self::iterate) checks whether a writer is waiting.
/// If one is, every bucket up to and including the one just consumed is
/// released and the held range shrinks to start at the next bucket. Buckets
/// before [`first`](Self::first) must not be read after that point.
pub struct IterReadLock<'a, T> {
    inner: ReadLock<'a, T>,
}

impl<'a, T> IterReadLock<'a, T> {
    pub(crate) fn acquire(ring: &'a RingBuffer<T>, first: Bucket, last: Bucket) -> Result<Self> {
        Ok(Self {
            inner: ReadLock::acquire(ring, first, last)?,
        })
    }

    /// First bucket still held.
    #[inline]
    pub fn first(&self) -> Bucket {
        self.inner.first
    }

    /// Last bucket of the held range.
    #[inline]
    pub fn last(&self) -> Bucket {
        self.inner.last
    }

    /// Number of buckets still held.
    pub fn total(&self) -> usize {
        self.inner.total()
    }

    /// Whether `bucket` is still held.
    pub fn contains(&self, bucket: Bucket) -> bool {
        self.inner.contains(bucket)
    }

    /// Borrow one held bucket.
    ///
    /// # Panics
    /// Panics if `bucket` has been released or was never in the range.
    pub fn get(&self, bucket: Bucket) -> &[T] {
        self.inner.get(bucket)
    }

    /// When `bucket` was last claimed for writing, if ever.
    pub fn time(&self, bucket: Bucket) -> Option<DateTime<Utc>> {
        self.inner.time(bucket)
    }

    /// Advance past `bucket`, which the caller has finished consuming.
    ///
    /// Returns the next bucket, or `None` once `bucket` is the last one.
    /// Releases `first..=bucket` first if a writer is waiting.
    pub fn iterate(&mut self, bucket: Bucket) -> Option<Bucket> {
        let next = self.inner.iterate(bucket)?;
        debug_assert!(self.contains(bucket));
        if self.inner.ring.release_prefix_if_contended(self.inner.first, bucket) {
            self.inner.first = next;
        }
        Some(next)
    }
}
