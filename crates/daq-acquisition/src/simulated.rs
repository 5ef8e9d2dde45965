//! In-memory [`SampleDevice`] for tests and benchmarks.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::{DeviceError, HalfBufferId, SampleDevice};

/// Simulated double-buffered device backed by two in-memory half buffers.
///
/// Counts `copy_out` calls, can expose its halves through
/// [`SampleDevice::internal_buffer`] and can be switched to fail every copy.
#[derive(Debug)]
pub struct SimulatedDevice {
    name: String,
    source_len: usize,
    halves: [RwLock<Arc<[u16]>>; 2],
    expose_internal: bool,
    copy_calls: AtomicUsize,
    failing: AtomicBool,
}

impl SimulatedDevice {
    /// Create a device whose halves hold `source_len` zeroed samples.
    pub fn new(name: impl Into<String>, source_len: usize) -> Self {
        let zeroed = || RwLock::new(Arc::from(vec![0u16; source_len]));
        Self {
            name: name.into(),
            source_len,
            halves: [zeroed(), zeroed()],
            expose_internal: false,
            copy_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// Serve halves through `internal_buffer` (builder form).
    #[must_use]
    pub fn with_internal_buffer(mut self, expose: bool) -> Self {
        self.expose_internal = expose;
        self
    }

    /// Replace the contents of `half`. Shorter input is zero padded.
    ///
    /// # Panics
    /// Panics if `samples` is longer than the source length.
    pub fn load(&self, half: HalfBufferId, samples: &[u16]) {
        assert!(samples.len() <= self.source_len, "samples exceed source length");
        let mut data = vec![0u16; self.source_len];
        data[..samples.len()].copy_from_slice(samples);
        *self.halves[half.index()].write() = Arc::from(data);
    }

    /// Number of `copy_out` calls so far.
    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    /// Make every following `copy_out` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SampleDevice for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_len(&self) -> usize {
        self.source_len
    }

    fn copy_out(
        &self,
        dest: &mut [u16],
        source_offset: usize,
        half: HalfBufferId,
    ) -> Result<(), DeviceError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::new(&self.name, "simulated copy failure"));
        }
        let end = source_offset + dest.len();
        if end > self.source_len {
            return Err(DeviceError::new(
                &self.name,
                format!("copy {source_offset}..{end} past source length {}", self.source_len),
            ));
        }
        dest.copy_from_slice(&self.halves[half.index()].read()[source_offset..end]);
        Ok(())
    }

    fn internal_buffer(&self, half: HalfBufferId) -> Option<Arc<[u16]>> {
        self.expose_internal
            .then(|| Arc::clone(&self.halves[half.index()].read()))
    }
}
