//! Narrow view of the acquisition hardware.
//!
//! The buffer only needs to copy raw samples out of the device's
//! double-buffered storage. Board setup, triggering and unit conversion live
//! elsewhere.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// One side of the device's double-buffered sample storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalfBufferId {
    /// First half
    First,
    /// Second half
    Second,
}

impl HalfBufferId {
    /// The opposite half.
    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    /// Index 0 or 1.
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

impl fmt::Display for HalfBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Second => write!(f, "second"),
        }
    }
}

/// Failure reported by a [`SampleDevice`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Device '{device}': {message}")]
pub struct DeviceError {
    /// Device name
    pub device: String,
    /// What went wrong
    pub message: String,
}

impl DeviceError {
    /// Create an error for `device`.
    pub fn new(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            message: message.into(),
        }
    }
}

/// Source of raw samples for an [`AcquisitionBuffer`](crate::AcquisitionBuffer).
pub trait SampleDevice: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Length in samples of each half buffer. Copies wrap at this length.
    fn source_len(&self) -> usize;

    /// Copy `dest.len()` samples from `half`, starting at `source_offset`.
    ///
    /// The range never crosses `source_len()`; callers split wrapping copies.
    fn copy_out(
        &self,
        dest: &mut [u16],
        source_offset: usize,
        half: HalfBufferId,
    ) -> Result<(), DeviceError>;

    /// Zero-copy access to a half buffer, if the device keeps one in memory.
    fn internal_buffer(&self, _half: HalfBufferId) -> Option<Arc<[u16]>> {
        None
    }
}

/// Copy `dest.len()` samples starting at `offset`, wrapping at the end of the
/// device's half buffer.
///
/// # Panics
/// Panics if `offset >= source_len` or `dest` is longer than `source_len`.
pub(crate) fn copy_wrapping(
    device: &dyn SampleDevice,
    half: HalfBufferId,
    offset: usize,
    dest: &mut [u16],
) -> Result<(), DeviceError> {
    let source_len = device.source_len();
    assert!(offset < source_len, "source offset {offset} >= {source_len}");
    assert!(dest.len() <= source_len, "copy longer than device source");

    let tail = source_len - offset;
    if dest.len() <= tail {
        device.copy_out(dest, offset, half)
    } else {
        let (head, rest) = dest.split_at_mut(tail);
        device.copy_out(head, offset, half)?;
        device.copy_out(rest, 0, half)
    }
}
