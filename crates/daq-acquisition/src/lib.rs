//! Buffered acquisition pipeline.
//!
//! Feeds continuously arriving, possibly partial, device sample blocks into a
//! bucketed [`RingBuffer`](daq_ring::RingBuffer) and serves the most recent
//! blocks to any number of concurrent readers.
//!
//! - [`CircularCursor`]: decides which bucket is written next and which
//!   buckets hold completed blocks
//! - [`AcquisitionBuffer`]: couples the cursor, the ring and a
//!   [`SampleDevice`]
//! - [`AcquisitionReadLock`] / [`AcquisitionWriteLock`]: scoped access that
//!   releases its claim on every exit path
//! - [`BufferSettings`]: figment-backed configuration
//!
//! # Example
//!
//! ```
//! use daq_acquisition::{AcquisitionBuffer, HalfBufferId, SimulatedDevice};
//! use std::sync::Arc;
//!
//! # fn main() -> daq_acquisition::Result<()> {
//! let device = Arc::new(SimulatedDevice::new("sim", 4));
//! device.load(HalfBufferId::First, &[1, 2, 3, 4]);
//!
//! let mut buffer = AcquisitionBuffer::new(device);
//! buffer.rebuild(4, 8, true)?;
//! buffer.begin_session()?;
//! buffer.save_full(HalfBufferId::First)?;
//!
//! if let Some(lock) = buffer.read_last()? {
//!     let block = lock.read(lock.last_bucket());
//!     assert_eq!(block.samples, &[1, 2, 3, 4]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod cursor;
pub mod device;
pub mod error;
pub mod lock;
pub mod simulated;

pub use buffer::{AcquisitionBuffer, AcquisitionStamp, BufferMode};
pub use config::{BufferSettings, ConfigError};
pub use cursor::{CircularCursor, Position};
pub use device::{DeviceError, HalfBufferId, SampleDevice};
pub use error::{AcquisitionError, CursorError, Result};
pub use lock::{AcquisitionReadLock, AcquisitionWriteLock, Block};
pub use simulated::SimulatedDevice;
