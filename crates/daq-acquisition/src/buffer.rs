//! Acquisition buffer: device blocks in, lookback windows out.
//!
//! [`AcquisitionBuffer`] owns a [`RingBuffer<u16>`] and a [`CircularCursor`]
//! and couples them in one fixed order:
//!
//! ```text
//! cursor position -> ring claim -> device copy -> slot metadata -> ring release -> cursor advance
//! ```
//!
//! The cursor never sees the ring and the ring never sees the cursor.
//!
//! # Modes
//!
//! - **Shared**: `bucket_count > 1`. Every save fills the cursor's current
//!   bucket; readers get windows of completed buckets.
//! - **Direct**: `bucket_count == 1`. No ring is allocated. A save only
//!   records which device half holds the newest block; the samples are
//!   fetched on the read path, either straight from the device's own memory
//!   or through a scratch copy made at most once per acquisition.

use chrono::{DateTime, Utc};
use daq_ring::RingBuffer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::config::BufferSettings;
use crate::cursor::CircularCursor;
use crate::device::{copy_wrapping, HalfBufferId, SampleDevice};
use crate::error::{AcquisitionError, CursorError, Result};
use crate::lock::{AcquisitionReadLock, AcquisitionWriteLock};

/// Identity of one direct-mode acquisition.
///
/// The sequence number keeps two saves within one clock tick distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionStamp {
    /// Per-buffer save counter
    pub sequence: u64,
    /// Wall-clock time of the save
    pub acquired_at: DateTime<Utc>,
}

/// Storage layout currently in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// No successful `rebuild()` yet, or the last one failed
    Unconfigured,
    /// Multi-bucket ring
    Shared,
    /// Single mutex-protected slot
    Direct,
}

enum Layout {
    Unconfigured,
    Shared(RingBuffer<u16>),
    Direct,
}

/// What a shared-mode bucket holds.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SlotMeta {
    /// Samples written
    pub valid: usize,
    /// Device source offset the samples were copied from
    pub begin: usize,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DirectBlock {
    pub half: HalfBufferId,
    pub valid: usize,
    pub begin: usize,
    pub stamp: AcquisitionStamp,
}

/// Single direct-mode slot plus its copy cache.
///
/// The cache holds the samples of the acquisition named by its stamp. Readers
/// take their own handle to it, so the mutex is only held while resolving.
#[derive(Debug, Default)]
pub(crate) struct DirectSlot {
    pub last: Option<DirectBlock>,
    pub cache: Option<(AcquisitionStamp, Arc<[u16]>)>,
}

/// Buffered store of device sample blocks for one producer and many readers.
pub struct AcquisitionBuffer {
    device: Arc<dyn SampleDevice>,
    bucket_size: usize,
    layout: Layout,
    cursor: CircularCursor,
    slots: Mutex<Vec<SlotMeta>>,
    direct: Mutex<DirectSlot>,
    sequence: AtomicU64,
    claim_timeout: Option<Duration>,
}

impl AcquisitionBuffer {
    /// Create an unconfigured buffer; call [`rebuild`](Self::rebuild) or
    /// [`apply`](Self::apply) before use.
    pub fn new(device: Arc<dyn SampleDevice>) -> Self {
        Self {
            device,
            bucket_size: 0,
            layout: Layout::Unconfigured,
            cursor: CircularCursor::new(),
            slots: Mutex::new(Vec::new()),
            direct: Mutex::new(DirectSlot::default()),
            sequence: AtomicU64::new(0),
            claim_timeout: None,
        }
    }

    /// Create a buffer configured from `settings`.
    pub fn from_settings(device: Arc<dyn SampleDevice>, settings: &BufferSettings) -> Result<Self> {
        let mut buffer = Self::new(device);
        buffer.apply(settings)?;
        Ok(buffer)
    }

    /// Rebuild from `settings`, including the claim timeout.
    pub fn apply(&mut self, settings: &BufferSettings) -> Result<()> {
        self.claim_timeout = settings.claim_timeout;
        self.rebuild(settings.bucket_size, settings.bucket_count, settings.shared)
    }

    /// Set up storage for `bucket_count` buckets of `bucket_size` samples.
    ///
    /// More than one bucket always selects shared mode; exactly one bucket
    /// always selects direct mode, whatever `want_shared` says. An existing
    /// ring of the same geometry is reused. The cursor is stopped, so a new
    /// session must be started with [`begin_session`](Self::begin_session).
    ///
    /// On allocation failure the buffer is left unconfigured.
    pub fn rebuild(
        &mut self,
        bucket_size: usize,
        bucket_count: usize,
        want_shared: bool,
    ) -> Result<()> {
        if bucket_size == 0 || bucket_count == 0 {
            return Err(AcquisitionError::InvalidGeometry {
                bucket_size,
                bucket_count,
            });
        }
        let shared = bucket_count != 1;
        if shared != want_shared {
            debug!(
                bucket_count,
                want_shared, shared, "bucket count overrides requested buffer mode"
            );
        }

        self.cursor.stop();
        self.slots.get_mut().clear();
        *self.direct.get_mut() = DirectSlot::default();

        if shared {
            let reuse = matches!(
                &self.layout,
                Layout::Shared(ring)
                    if ring.bucket_size() == bucket_size && ring.total_buckets() == bucket_count
            );
            if reuse {
                if let Layout::Shared(ring) = &mut self.layout {
                    ring.set_claim_timeout(self.claim_timeout);
                }
                debug!(bucket_size, bucket_count, "reusing ring buffer");
            } else {
                // Release the old ring before allocating the new one
                self.layout = Layout::Unconfigured;
                self.bucket_size = 0;
                match RingBuffer::try_new(bucket_size, bucket_count) {
                    Ok(ring) => {
                        self.layout = Layout::Shared(ring.with_claim_timeout(self.claim_timeout));
                    }
                    Err(source) => {
                        error!(
                            bucket_size,
                            bucket_count,
                            error = %source,
                            "Failed to allocate acquisition buffer"
                        );
                        return Err(AcquisitionError::OutOfMemory {
                            bucket_size,
                            bucket_count,
                            shared,
                            source,
                        });
                    }
                }
            }
            self.cursor.set_limits(0, bucket_count - 1)?;
            self.slots
                .get_mut()
                .resize(bucket_count, SlotMeta::default());
        } else {
            self.layout = Layout::Direct;
        }
        self.bucket_size = bucket_size;

        info!(
            device = self.device.name(),
            bucket_size,
            bucket_count,
            mode = ?self.mode(),
            "Acquisition buffer rebuilt"
        );
        Ok(())
    }

    /// Start a new acquisition run: claim the first bucket and forget all
    /// previously saved blocks.
    pub fn begin_session(&self) -> Result<()> {
        match &self.layout {
            Layout::Unconfigured => return Err(AcquisitionError::NotConfigured),
            Layout::Shared(_) => {
                self.cursor.stop();
                self.cursor.starts_with(0)?;
                self.cursor.advance()?;
                self.slots.lock().fill(SlotMeta::default());
            }
            Layout::Direct => {
                let mut slot = self.direct.lock();
                slot.last = None;
                slot.cache = None;
            }
        }
        info!(device = self.device.name(), "Acquisition session started");
        Ok(())
    }

    /// End the acquisition run. Shared-mode reads return `None` until the
    /// next session; direct mode keeps serving its last block.
    pub fn end_session(&self) {
        self.cursor.stop();
        info!(device = self.device.name(), "Acquisition session stopped");
    }

    /// Save one full bucket copied from `half`, starting at source offset 0.
    pub fn save_full(&self, half: HalfBufferId) -> Result<()> {
        self.save(half, 0, self.bucket_size)
    }

    /// Save `valid_count` samples copied from `half`, starting at
    /// `source_offset` and wrapping at the end of the device source.
    pub fn save_partial(
        &self,
        half: HalfBufferId,
        source_offset: usize,
        valid_count: usize,
    ) -> Result<()> {
        debug!(
            %half,
            source_offset, valid_count, "saving partial block"
        );
        self.save(half, source_offset, valid_count)
    }

    fn save(&self, half: HalfBufferId, begin: usize, valid: usize) -> Result<()> {
        if matches!(self.layout, Layout::Unconfigured) {
            return Err(AcquisitionError::NotConfigured);
        }
        self.check_source(begin, valid)?;

        match &self.layout {
            Layout::Unconfigured => Err(AcquisitionError::NotConfigured),
            Layout::Shared(ring) => {
                let bucket = self.cursor.current()?;
                {
                    let mut lock = ring.write_lock(bucket)?;
                    copy_wrapping(&*self.device, half, begin, &mut lock[..valid])?;
                    // Recorded before the claim is released so readers never
                    // pair new samples with stale metadata
                    self.slots.lock()[bucket] = SlotMeta { valid, begin };
                }
                self.cursor.advance()?;
                Ok(())
            }
            Layout::Direct => {
                let stamp = self.next_stamp();
                self.direct.lock().last = Some(DirectBlock {
                    half,
                    valid,
                    begin,
                    stamp,
                });
                Ok(())
            }
        }
    }

    fn check_source(&self, source_offset: usize, valid_count: usize) -> Result<()> {
        let source_len = self.device.source_len();
        if valid_count > self.bucket_size
            || valid_count > source_len
            || source_offset >= source_len
        {
            return Err(AcquisitionError::InvalidPartial {
                source_offset,
                valid_count,
                bucket_size: self.bucket_size,
                source_len,
            });
        }
        Ok(())
    }

    fn next_stamp(&self) -> AcquisitionStamp {
        AcquisitionStamp {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            acquired_at: Utc::now(),
        }
    }

    /// Scoped write access to the current bucket for producers that fill it
    /// in place. Dropping the lock records the bucket and advances the cursor.
    ///
    /// Only available in shared mode.
    pub fn write_lock(&self) -> Result<AcquisitionWriteLock<'_>> {
        let ring = self.ring()?;
        let bucket = self.cursor.current()?;
        let lock = ring.write_lock(bucket)?;
        Ok(AcquisitionWriteLock::new(lock, &self.slots, &self.cursor))
    }

    /// Most recently completed block, or `None` if nothing is saved yet.
    pub fn read_last(&self) -> Result<Option<AcquisitionReadLock<'_>>> {
        self.read_window(1, 0)
    }

    /// The last `window_size` completed blocks, skipping the `back_offset`
    /// newest ones.
    ///
    /// The window is truncated when fewer blocks exist; `None` means none
    /// exist that far back.
    ///
    /// # Errors
    /// [`AcquisitionError::WindowTooLarge`] when the window cannot fit the
    /// buffer, [`AcquisitionError::Ring`] on a claim timeout.
    pub fn read_window(
        &self,
        window_size: usize,
        back_offset: usize,
    ) -> Result<Option<AcquisitionReadLock<'_>>> {
        match &self.layout {
            Layout::Unconfigured => Err(AcquisitionError::NotConfigured),
            Layout::Shared(ring) => {
                if window_size > ring.total_buckets() {
                    return Err(AcquisitionError::WindowTooLarge {
                        requested: window_size,
                        capacity: ring.total_buckets(),
                    });
                }
                loop {
                    let window = self.cursor.lookback_window(window_size, back_offset)?;
                    let Some((first, last)) = window else {
                        return Ok(None);
                    };
                    let lock = ring.iter_read_lock(first, last)?;
                    // The producer may have moved on while the claim was pending
                    if self.cursor.lookback_window(window_size, back_offset)? == window {
                        return Ok(Some(AcquisitionReadLock::shared(lock, &self.slots)));
                    }
                    trace!(first, last, "read window moved while claiming, retrying");
                }
            }
            Layout::Direct => {
                if window_size == 0 {
                    return Err(CursorError::EmptyWindow.into());
                }
                if window_size != 1 {
                    return Err(AcquisitionError::WindowTooLarge {
                        requested: window_size,
                        capacity: 1,
                    });
                }
                if back_offset > 0 {
                    return Ok(None);
                }
                self.read_direct()
            }
        }
    }

    fn read_direct(&self) -> Result<Option<AcquisitionReadLock<'_>>> {
        let mut slot = self.direct.lock();
        let Some(block) = slot.last else {
            return Ok(None);
        };

        let device_memory = if block.begin == 0 {
            self.device
                .internal_buffer(block.half)
                .filter(|memory| memory.len() >= block.valid)
        } else {
            None
        };

        let cached = match &slot.cache {
            Some((stamp, cached)) if *stamp == block.stamp => Some(Arc::clone(cached)),
            _ => None,
        };
        let memory = match device_memory.or(cached) {
            Some(memory) => memory,
            None => {
                let mut samples = vec![0u16; block.valid];
                copy_wrapping(&*self.device, block.half, block.begin, &mut samples)?;
                let copied: Arc<[u16]> = Arc::from(samples);
                slot.cache = Some((block.stamp, Arc::clone(&copied)));
                debug!(
                    sequence = block.stamp.sequence,
                    valid = block.valid,
                    "copied direct block into cache"
                );
                copied
            }
        };
        drop(slot);

        Ok(Some(AcquisitionReadLock::direct(block, memory)))
    }

    /// Current storage layout.
    pub fn mode(&self) -> BufferMode {
        match self.layout {
            Layout::Unconfigured => BufferMode::Unconfigured,
            Layout::Shared(_) => BufferMode::Shared,
            Layout::Direct => BufferMode::Direct,
        }
    }

    /// Samples per bucket, 0 while unconfigured.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Number of buckets: 0 while unconfigured, 1 in direct mode.
    pub fn bucket_count(&self) -> usize {
        match &self.layout {
            Layout::Unconfigured => 0,
            Layout::Shared(ring) => ring.total_buckets(),
            Layout::Direct => 1,
        }
    }

    /// Write cursor driving shared mode.
    pub fn cursor(&self) -> &CircularCursor {
        &self.cursor
    }

    /// Underlying ring, for claim diagnostics.
    pub fn ring(&self) -> Result<&RingBuffer<u16>> {
        match &self.layout {
            Layout::Unconfigured => Err(AcquisitionError::NotConfigured),
            Layout::Shared(ring) => Ok(ring),
            Layout::Direct => Err(AcquisitionError::DirectMode),
        }
    }
}

impl std::fmt::Debug for AcquisitionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionBuffer")
            .field("device", &self.device.name())
            .field("mode", &self.mode())
            .field("bucket_size", &self.bucket_size)
            .field("bucket_count", &self.bucket_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedDevice;
    use tracing_test::traced_test;

    fn buffer(source_len: usize) -> (Arc<SimulatedDevice>, AcquisitionBuffer) {
        let device = Arc::new(SimulatedDevice::new("sim", source_len));
        let buffer = AcquisitionBuffer::new(device.clone());
        (device, buffer)
    }

    #[test]
    fn test_mode_follows_bucket_count() {
        let (_, mut buffer) = buffer(8);
        assert_eq!(buffer.mode(), BufferMode::Unconfigured);

        buffer.rebuild(8, 1, true).unwrap();
        assert_eq!(buffer.mode(), BufferMode::Direct);
        assert!(matches!(buffer.ring(), Err(AcquisitionError::DirectMode)));

        buffer.rebuild(8, 4, false).unwrap();
        assert_eq!(buffer.mode(), BufferMode::Shared);
        assert_eq!(buffer.bucket_count(), 4);
        assert_eq!(buffer.cursor().limits(), Some((0, 3)));
    }

    #[test]
    fn test_invalid_geometry() {
        let (_, mut buffer) = buffer(8);
        assert!(matches!(
            buffer.rebuild(0, 4, true),
            Err(AcquisitionError::InvalidGeometry {
                bucket_size: 0,
                bucket_count: 4
            })
        ));
        assert!(matches!(
            buffer.rebuild(8, 0, true),
            Err(AcquisitionError::InvalidGeometry { .. })
        ));
        assert_eq!(buffer.mode(), BufferMode::Unconfigured);
    }

    #[traced_test]
    #[test]
    fn test_allocation_failure_leaves_buffer_unconfigured() {
        let (_, mut buffer) = buffer(8);
        buffer.rebuild(8, 4, true).unwrap();

        let err = buffer.rebuild(usize::MAX / 2, 4, true).unwrap_err();
        assert!(err.is_unconfigured());
        assert!(err.to_string().contains("bucket_count=4"));
        assert!(logs_contain("Failed to allocate acquisition buffer"));

        assert_eq!(buffer.mode(), BufferMode::Unconfigured);
        assert_eq!(buffer.bucket_size(), 0);
        assert!(matches!(
            buffer.save_full(HalfBufferId::First),
            Err(AcquisitionError::NotConfigured)
        ));
        assert!(matches!(buffer.read_last(), Err(AcquisitionError::NotConfigured)));
    }

    #[traced_test]
    #[test]
    fn test_rebuild_logs_mode() {
        let (_, mut buffer) = buffer(8);
        buffer.rebuild(8, 3, true).unwrap();
        assert!(logs_contain("Acquisition buffer rebuilt"));
        assert!(logs_contain("Shared"));
    }

    #[test]
    fn test_stamps_are_unique() {
        let (_, buffer) = buffer(8);
        let a = buffer.next_stamp();
        let b = buffer.next_stamp();
        assert_ne!(a, b);
        assert!(b.sequence > a.sequence);
    }
}
