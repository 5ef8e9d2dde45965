//! Error types for ring buffer operations.

use std::time::Duration;
use thiserror::Error;

use crate::Bucket;

/// Result type alias for ring buffer operations.
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors that can occur when allocating or claiming a [`RingBuffer`](crate::RingBuffer).
///
/// Index violations (buckets outside the ring, destination slices that are
/// too short) are programming errors and panic instead of surfacing here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// The backing store could not be allocated.
    #[error(
        "Out of memory allocating ring buffer: total_buckets={total_buckets}, bucket_size={bucket_size}"
    )]
    OutOfMemory {
        /// Requested elements per bucket
        bucket_size: usize,
        /// Requested number of buckets
        total_buckets: usize,
    },

    /// A claim waited longer than the configured claim timeout.
    #[error("Timed out after {timeout:?} waiting to claim buckets {first}..={last}")]
    ClaimTimeout {
        /// First bucket of the requested range
        first: Bucket,
        /// Last bucket of the requested range (equal to `first` for writes)
        last: Bucket,
        /// Configured timeout that expired
        timeout: Duration,
    },
}

impl RingError {
    /// Check if this is an allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    /// Check if this is a claim timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ClaimTimeout { .. })
    }
}
