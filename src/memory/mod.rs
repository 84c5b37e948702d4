//! Device memory for symmetric allocation.
//!
//! # Architecture
//!
//! - [`DeviceAllocator`]: allocate/free interface a pool draws segments from
//!   (the native NCCL plugin, or [`HostAllocator`] on CPU-only hosts)
//! - [`MemoryPool`]: segment-based pool with snapshot support
//! - [`DeviceBuffer`]: RAII guard that returns its block to the pool on drop
//! - [`PoolContext`]: per-thread routing of allocations into a pool
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use symm_mem::memory::{self, HostAllocator, MemoryPool, PoolContext};
//! use symm_mem::runtime::StreamHandle;
//!
//! let pool = Arc::new(MemoryPool::new(Arc::new(HostAllocator::new())));
//! let ctx = PoolContext::new(pool.clone());
//!
//! let guard = ctx.enter();
//! let buffer = memory::allocate(1 << 16, 0, StreamHandle::DEFAULT)
//!     .unwrap()
//!     .expect("routed to the pool");
//! drop(guard);
//!
//! assert_eq!(pool.snapshot()[0].address, buffer.as_ptr());
//! ```

mod allocator;
mod pool;
mod routing;
mod segment;

pub use allocator::{DeviceAllocator, HostAllocator};
pub use pool::{
    DeviceBuffer, MIN_BLOCK_SIZE, MemoryPool, PoolId, SEGMENT_GRANULARITY, SMALL_REQUEST_LIMIT,
};
pub use routing::{PoolContext, RoutingGuard, allocate, current_pool};
pub use segment::SegmentInfo;
