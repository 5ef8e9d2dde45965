//! Scoped access to an [`AcquisitionBuffer`](crate::AcquisitionBuffer).

use chrono::{DateTime, Utc};
use daq_ring::{Bucket, IterReadLock, WriteLock};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::buffer::{DirectBlock, SlotMeta};
use crate::cursor::CircularCursor;

/// One saved block as seen by a reader.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    /// Bucket the block lives in (always 0 in direct mode)
    pub bucket: Bucket,
    /// Valid samples of the block
    pub samples: &'a [u16],
    /// Device source offset the samples were copied from
    pub source_offset: usize,
    /// When the block was saved
    pub acquired_at: Option<DateTime<Utc>>,
}

enum ReadClaim<'a> {
    Shared {
        lock: IterReadLock<'a, u16>,
        slots: &'a Mutex<Vec<SlotMeta>>,
    },
    Direct {
        block: DirectBlock,
        memory: Arc<[u16]>,
    },
}

/// Read access to a window of saved blocks.
///
/// In shared mode the window's buckets are claimed in the ring; the producer
/// only waits if it needs one of them. In direct mode the lock keeps its own
/// handle to the block's samples, so any number of readers may hold one and
/// the producer never waits; a newer save is seen by the next read.
pub struct AcquisitionReadLock<'a> {
    claim: ReadClaim<'a>,
}

impl<'a> AcquisitionReadLock<'a> {
    pub(crate) fn shared(lock: IterReadLock<'a, u16>, slots: &'a Mutex<Vec<SlotMeta>>) -> Self {
        Self {
            claim: ReadClaim::Shared { lock, slots },
        }
    }

    pub(crate) fn direct(block: DirectBlock, memory: Arc<[u16]>) -> Self {
        Self {
            claim: ReadClaim::Direct { block, memory },
        }
    }

    /// Oldest bucket still held.
    pub fn first_bucket(&self) -> Bucket {
        match &self.claim {
            ReadClaim::Shared { lock, .. } => lock.first(),
            ReadClaim::Direct { .. } => 0,
        }
    }

    /// Newest bucket of the window.
    pub fn last_bucket(&self) -> Bucket {
        match &self.claim {
            ReadClaim::Shared { lock, .. } => lock.last(),
            ReadClaim::Direct { .. } => 0,
        }
    }

    /// Number of buckets still held.
    pub fn total(&self) -> usize {
        match &self.claim {
            ReadClaim::Shared { lock, .. } => lock.total(),
            ReadClaim::Direct { .. } => 1,
        }
    }

    /// Step past `bucket`, oldest to newest. Returns `None` after the last.
    ///
    /// Buckets already stepped past may be handed back to a waiting producer
    /// and must not be read again.
    pub fn iterate(&mut self, bucket: Bucket) -> Option<Bucket> {
        match &mut self.claim {
            ReadClaim::Shared { lock, .. } => lock.iterate(bucket),
            ReadClaim::Direct { .. } => None,
        }
    }

    /// The block stored in `bucket`.
    ///
    /// # Panics
    /// Panics if `bucket` is not held by this lock.
    pub fn read(&self, bucket: Bucket) -> Block<'_> {
        match &self.claim {
            ReadClaim::Shared { lock, slots } => {
                let meta = slots.lock()[bucket];
                Block {
                    bucket,
                    samples: &lock.get(bucket)[..meta.valid],
                    source_offset: meta.begin,
                    acquired_at: lock.time(bucket),
                }
            }
            ReadClaim::Direct { block, memory } => {
                assert_eq!(bucket, 0, "direct mode holds bucket 0 only");
                Block {
                    bucket,
                    samples: &memory[..block.valid],
                    source_offset: block.begin,
                    acquired_at: Some(block.stamp.acquired_at),
                }
            }
        }
    }

    /// Valid sample count of the newest block.
    pub fn last_bucket_len(&self) -> usize {
        match &self.claim {
            ReadClaim::Shared { lock, slots } => slots.lock()[lock.last()].valid,
            ReadClaim::Direct { block, .. } => block.valid,
        }
    }

    /// Sequence number of the direct-mode acquisition, if any.
    pub fn sequence(&self) -> Option<u64> {
        match &self.claim {
            ReadClaim::Shared { .. } => None,
            ReadClaim::Direct { block, .. } => Some(block.stamp.sequence),
        }
    }
}

/// Advances the cursor when dropped, after the ring claim is released.
struct AdvanceOnDrop<'a> {
    cursor: Option<&'a CircularCursor>,
}

impl Drop for AdvanceOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor {
            if let Err(e) = cursor.advance() {
                error!(error = %e, "Failed to advance cursor after in-place write");
            }
        }
    }
}

/// Write access to the current bucket of a shared-mode buffer.
///
/// Dereferences to the full bucket. On drop the bucket is recorded as holding
/// [`set_valid_len`](Self::set_valid_len) samples (the whole bucket by
/// default), the claim is released and the cursor advances. If the producer
/// panics while holding the lock, the bucket is released but neither
/// recorded nor advanced past.
pub struct AcquisitionWriteLock<'a> {
    // Field order matters: the ring claim is released before the cursor moves
    lock: WriteLock<'a, u16>,
    advance: AdvanceOnDrop<'a>,
    slots: &'a Mutex<Vec<SlotMeta>>,
    valid: usize,
}

impl<'a> AcquisitionWriteLock<'a> {
    pub(crate) fn new(
        lock: WriteLock<'a, u16>,
        slots: &'a Mutex<Vec<SlotMeta>>,
        cursor: &'a CircularCursor,
    ) -> Self {
        let valid = lock.len();
        Self {
            lock,
            advance: AdvanceOnDrop {
                cursor: Some(cursor),
            },
            slots,
            valid,
        }
    }

    /// Bucket being written.
    pub fn bucket(&self) -> Bucket {
        self.lock.bucket()
    }

    /// Record only the first `len` samples as valid.
    ///
    /// # Panics
    /// Panics if `len` exceeds the bucket size.
    pub fn set_valid_len(&mut self, len: usize) {
        assert!(len <= self.lock.len(), "valid length {len} exceeds bucket size");
        self.valid = len;
    }
}

impl Deref for AcquisitionWriteLock<'_> {
    type Target = [u16];

    fn deref(&self) -> &Self::Target {
        &self.lock
    }
}

impl DerefMut for AcquisitionWriteLock<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.lock
    }
}

impl Drop for AcquisitionWriteLock<'_> {
    fn drop(&mut self) {
        let bucket = self.lock.bucket();
        if std::thread::panicking() {
            warn!(bucket, "In-place write abandoned; bucket not recorded");
            self.advance.cursor = None;
            return;
        }
        self.slots.lock()[bucket] = SlotMeta {
            valid: self.valid,
            begin: 0,
        };
        debug!(bucket, valid = self.valid, "in-place write recorded");
    }
}
