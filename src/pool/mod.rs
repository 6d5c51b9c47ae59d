//! Buffer pool for codec planes
//!
//! Provides CPU/GPU dual-mapped buffers sized from plane descriptors, reused
//! across frames and reclaimed by per-tick housekeeping.

mod buffer;
mod descriptor;
#[allow(clippy::module_inception)]
mod pool;

pub use buffer::{Buffer, BufferId, BufferLease, PlaneWriteGuard};
pub use descriptor::{PixelFormat, PlaneDescriptor, BLOCK_DIM};
pub use pool::{BufferPool, HousekeepingReport, PoolConfig, PoolStats};
