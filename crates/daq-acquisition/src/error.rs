//! Error types for the acquisition pipeline.

use daq_ring::RingError;
use thiserror::Error;

use crate::cursor::Position;
use crate::device::DeviceError;

/// Result type alias for acquisition buffer operations.
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Sequencing and configuration errors raised by
/// [`CircularCursor`](crate::CircularCursor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Limits have not been set
    #[error("Cursor limits are not configured")]
    NotConfigured,

    /// `min` must be strictly below `max`
    #[error("Invalid cursor limits [{min}, {max}]: min must be below max")]
    InvalidLimits { min: Position, max: Position },

    /// Limits cannot change and a session cannot restart while one is running
    #[error("Cursor session is active; call stop() first")]
    AlreadyActive,

    /// Start position outside the configured limits
    #[error("Position {position} outside cursor limits [{min}, {max}]")]
    OutOfRange {
        position: Position,
        min: Position,
        max: Position,
    },

    /// `advance()`/`current()` before `starts_with()`
    #[error("Cursor has not been started")]
    NotStarted,

    /// Lookback window larger than the ring can ever hold
    #[error("Window of {requested} buckets exceeds capacity of {capacity}")]
    WindowTooLarge { requested: usize, capacity: usize },

    /// Lookback window of zero buckets
    #[error("Window must contain at least one bucket")]
    EmptyWindow,
}

/// Errors that can occur when configuring, filling or reading an
/// [`AcquisitionBuffer`](crate::AcquisitionBuffer).
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Zero bucket size or bucket count
    #[error("Invalid buffer geometry: bucket_size={bucket_size}, bucket_count={bucket_count}")]
    InvalidGeometry {
        bucket_size: usize,
        bucket_count: usize,
    },

    /// The ring could not be allocated; the buffer is left unconfigured
    #[error(
        "Out of memory building acquisition buffer: bucket_count={bucket_count}, bucket_size={bucket_size}, shared={shared}"
    )]
    OutOfMemory {
        bucket_size: usize,
        bucket_count: usize,
        shared: bool,
        #[source]
        source: RingError,
    },

    /// Buffer used before `rebuild()` succeeded
    #[error("Acquisition buffer is not configured")]
    NotConfigured,

    /// Partial block that does not fit the bucket or the device source
    #[error(
        "Invalid partial block: offset={source_offset}, count={valid_count} (bucket_size={bucket_size}, source_len={source_len})"
    )]
    InvalidPartial {
        source_offset: usize,
        valid_count: usize,
        bucket_size: usize,
        source_len: usize,
    },

    /// Read window larger than the buffer
    #[error("Read window of {requested} buckets exceeds buffer capacity of {capacity}")]
    WindowTooLarge { requested: usize, capacity: usize },

    /// Operation needs a shared ring but the buffer runs in direct mode
    #[error("Operation not available in direct (single slot) mode")]
    DirectMode,

    /// Ring buffer claim failure
    #[error(transparent)]
    Ring(#[from] RingError),

    /// Cursor sequencing failure
    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// Device copy failure
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl AcquisitionError {
    /// Check if this error means the buffer has no usable storage.
    pub fn is_unconfigured(&self) -> bool {
        matches!(self, Self::NotConfigured | Self::OutOfMemory { .. })
    }
}
