//! Segment-based device memory pool.

use super::DeviceAllocator;
use super::segment::{Segment, SegmentInfo};
use crate::error::{Error, Result};
use crate::runtime::{DeviceId, StreamHandle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Every block is rounded up to this many bytes.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Requests up to this size share small segments.
pub const SMALL_REQUEST_LIMIT: usize = 1 << 20;

/// Size of a segment serving small requests; large segments are rounded up
/// to a multiple of it.
pub const SEGMENT_GRANULARITY: usize = 2 << 20;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a pool, used to match routing guards to their pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// A memory pool that carves blocks out of segments drawn from a
/// [`DeviceAllocator`].
///
/// # Design
///
/// - Segments are per device and stream, so a block is only reused by the
///   stream it was allocated for
/// - Segments are never handed back to the allocator while the pool lives;
///   a segment base address, once registered, stays valid
/// - [`snapshot`](Self::snapshot) lists every segment, which is what the
///   registration pass diffs against
/// - [`DeviceBuffer`] returns its block to the pool on drop
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use symm_mem::memory::{HostAllocator, MemoryPool};
/// use symm_mem::runtime::StreamHandle;
///
/// let pool = Arc::new(MemoryPool::new(Arc::new(HostAllocator::new())));
/// let buffer = pool.allocate(4096, 0, StreamHandle::DEFAULT).unwrap();
/// assert_eq!(pool.snapshot().len(), 1);
/// drop(buffer);
/// assert_eq!(pool.allocated_bytes(), 0);
/// ```
pub struct MemoryPool {
    id: PoolId,
    allocator: Arc<dyn DeviceAllocator>,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    /// Segments keyed by base address.
    segments: BTreeMap<usize, Segment>,
    reserved: usize,
    allocated: usize,
}

impl MemoryPool {
    /// Create an empty pool over `allocator`.
    pub fn new(allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            id: PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
            allocator,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// This pool's identity.
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Name of the backing allocator.
    pub fn allocator_name(&self) -> &str {
        self.allocator.name()
    }

    /// Allocate a block and wrap it in an RAII [`DeviceBuffer`].
    pub fn allocate(
        self: &Arc<Self>,
        size: usize,
        device: DeviceId,
        stream: StreamHandle,
    ) -> Result<DeviceBuffer> {
        let ptr = self.allocate_raw(size, device, stream)?;
        Ok(DeviceBuffer {
            pool: Arc::clone(self),
            ptr,
            size,
            device,
            stream,
        })
    }

    /// Allocate a block and return its address.
    ///
    /// The block must be handed back with [`free_raw`](Self::free_raw).
    /// Fails with [`Error::AllocationFailed`] if the backing allocator
    /// returns null for a new segment.
    pub fn allocate_raw(&self, size: usize, device: DeviceId, stream: StreamHandle) -> Result<usize> {
        let oversized = || {
            tracing::warn!(size = size, device = device, "allocation size overflows");
            Error::AllocationFailed { size, device }
        };
        let block = round_up(size.max(1), MIN_BLOCK_SIZE).ok_or_else(oversized)?;
        let segment_size = segment_size_for(block).ok_or_else(oversized)?;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for (&base, segment) in state.segments.iter_mut() {
            if !segment.serves(device, stream) {
                continue;
            }
            if let Some(offset) = segment.carve(block) {
                state.allocated += block;
                return Ok(base + offset);
            }
        }

        let ptr = self.allocator.allocate(segment_size, device, stream);
        if ptr.is_null() {
            tracing::warn!(
                allocator = self.allocator.name(),
                size = segment_size,
                device = device,
                stream = %stream,
                "backing allocator returned null"
            );
            return Err(Error::AllocationFailed {
                size: segment_size,
                device,
            });
        }

        let base = ptr as usize;
        let mut segment = Segment::new(device, stream, segment_size);
        let offset = segment.carve(block);
        debug_assert_eq!(offset, Some(0));
        state.segments.insert(base, segment);
        state.reserved += segment_size;
        state.allocated += block;

        tracing::debug!(
            pool = %self.id,
            address = format_args!("{:#x}", base),
            size = segment_size,
            device = device,
            stream = %stream,
            "new pool segment"
        );
        crate::observability::record_pool_usage(state.segments.len(), state.reserved);

        Ok(base)
    }

    /// Return a block obtained from [`allocate_raw`](Self::allocate_raw).
    pub fn free_raw(&self, ptr: usize) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (base, segment) = state
            .segments
            .range_mut(..=ptr)
            .next_back()
            .ok_or(Error::InvalidFree(ptr))?;
        if ptr - base >= segment.size {
            return Err(Error::InvalidFree(ptr));
        }
        let offset = ptr - base;
        let released = segment.release(offset).ok_or(Error::InvalidFree(ptr))?;
        state.allocated -= released;
        Ok(())
    }

    /// List every segment currently held by the pool, in address order.
    pub fn snapshot(&self) -> Vec<SegmentInfo> {
        let state = self.state.lock();
        state
            .segments
            .iter()
            .map(|(&base, segment)| segment.info(base))
            .collect()
    }

    /// Number of segments held.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Bytes reserved from the backing allocator.
    pub fn reserved_bytes(&self) -> usize {
        self.state.lock().reserved
    }

    /// Bytes handed out as blocks (after rounding).
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (base, segment) in std::mem::take(&mut state.segments) {
            // SAFETY: every segment base came from this allocator with this size.
            unsafe {
                self.allocator.free(
                    base as *mut std::ffi::c_void,
                    segment.size,
                    segment.device,
                    segment.stream,
                );
            }
        }
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryPool")
            .field("id", &self.id)
            .field("allocator", &self.allocator.name())
            .field("segments", &state.segments.len())
            .field("reserved", &state.reserved)
            .field("allocated", &state.allocated)
            .finish()
    }
}

/// A block of pool memory.
///
/// This is an RAII guard: when dropped, the block is returned to the pool
/// (the segment itself stays with the pool).
pub struct DeviceBuffer {
    pool: Arc<MemoryPool>,
    ptr: usize,
    size: usize,
    device: DeviceId,
    stream: StreamHandle,
}

impl DeviceBuffer {
    /// Device address of the block.
    pub fn as_ptr(&self) -> usize {
        self.ptr
    }

    /// Requested size in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true for zero-sized requests.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Device the block lives on.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Stream the block was allocated for.
    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    /// The pool this block belongs to.
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }
}

impl crate::comm::SymmetricStorage for DeviceBuffer {
    fn storage_ptr(&self) -> usize {
        self.ptr
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.pool.free_raw(self.ptr) {
            tracing::error!(error = %e, "failed to return block to pool");
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("size", &self.size)
            .field("device", &self.device)
            .field("stream", &self.stream)
            .finish()
    }
}

/// `None` on overflow.
fn round_up(value: usize, multiple: usize) -> Option<usize> {
    value.checked_next_multiple_of(multiple)
}

fn segment_size_for(block: usize) -> Option<usize> {
    if block <= SMALL_REQUEST_LIMIT {
        Some(SEGMENT_GRANULARITY)
    } else {
        round_up(block, SEGMENT_GRANULARITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostAllocator;
    use std::thread;

    fn host_pool() -> Arc<MemoryPool> {
        Arc::new(MemoryPool::new(Arc::new(HostAllocator::new())))
    }

    #[test]
    fn test_small_allocations_share_a_segment() {
        let pool = host_pool();
        let a = pool.allocate(100, 0, StreamHandle::DEFAULT).unwrap();
        let b = pool.allocate(1000, 0, StreamHandle::DEFAULT).unwrap();

        assert_eq!(pool.segment_count(), 1);
        assert_eq!(pool.reserved_bytes(), SEGMENT_GRANULARITY);
        assert_eq!(pool.allocated_bytes(), 512 + 1024);
        assert_eq!(b.as_ptr() - a.as_ptr(), 512);
    }

    #[test]
    fn test_large_allocation_rounds_segment() {
        let pool = host_pool();
        let size = 5 * 1024 * 1024 + 3;
        let buf = pool.allocate(size, 0, StreamHandle::DEFAULT).unwrap();

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].total_size, 6 * 1024 * 1024);
        assert_eq!(snapshot[0].address, buf.as_ptr());
        assert!(snapshot[0].total_size >= size);
    }

    #[test]
    fn test_streams_do_not_share_segments() {
        let pool = host_pool();
        let _a = pool.allocate(64, 0, StreamHandle::DEFAULT).unwrap();
        let _b = pool.allocate(64, 0, StreamHandle::from_raw(0xbeef)).unwrap();
        let _c = pool.allocate(64, 1, StreamHandle::DEFAULT).unwrap();

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.iter().filter(|s| s.on_default_stream()).count(), 2);
    }

    #[test]
    fn test_freed_block_is_reused() {
        let pool = host_pool();
        let first = pool.allocate(4096, 0, StreamHandle::DEFAULT).unwrap();
        let addr = first.as_ptr();
        drop(first);

        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.segment_count(), 1);

        let second = pool.allocate(4096, 0, StreamHandle::DEFAULT).unwrap();
        assert_eq!(second.as_ptr(), addr);
        assert_eq!(pool.segment_count(), 1);
    }

    #[test]
    fn test_allocation_failure_surfaces_error() {
        let pool = Arc::new(MemoryPool::new(Arc::new(HostAllocator::with_limit(
            SEGMENT_GRANULARITY,
        ))));
        let _a = pool.allocate(SMALL_REQUEST_LIMIT, 0, StreamHandle::DEFAULT).unwrap();
        let _b = pool.allocate(SMALL_REQUEST_LIMIT, 0, StreamHandle::DEFAULT).unwrap();
        let c = pool.allocate(64, 0, StreamHandle::DEFAULT);

        assert!(matches!(c, Err(Error::AllocationFailed { device: 0, .. })));
        assert_eq!(pool.segment_count(), 1);
    }

    #[test]
    fn test_oversized_request_fails_cleanly() {
        let host = Arc::new(HostAllocator::new());
        let pool = Arc::new(MemoryPool::new(host.clone()));

        for size in [usize::MAX, usize::MAX - 10, usize::MAX - 511] {
            let result = pool.allocate(size, 0, StreamHandle::DEFAULT);
            assert!(matches!(
                result,
                Err(Error::AllocationFailed { size: s, device: 0 }) if s == size
            ));
        }

        assert_eq!(pool.segment_count(), 0);
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(host.in_use(), 0);
    }

    #[test]
    fn test_rounding_overflow() {
        assert_eq!(round_up(1, MIN_BLOCK_SIZE), Some(MIN_BLOCK_SIZE));
        assert_eq!(round_up(usize::MAX, MIN_BLOCK_SIZE), None);
        assert_eq!(segment_size_for(100), Some(SEGMENT_GRANULARITY));
        assert_eq!(segment_size_for(usize::MAX - 511), None);
    }

    #[test]
    fn test_invalid_free() {
        let pool = host_pool();
        let buf = pool.allocate(1024, 0, StreamHandle::DEFAULT).unwrap();

        assert!(matches!(pool.free_raw(1), Err(Error::InvalidFree(1))));
        assert!(pool.free_raw(buf.as_ptr() + 8).is_err());
        let past_end = buf.as_ptr() + SEGMENT_GRANULARITY;
        assert!(pool.free_raw(past_end).is_err());
    }

    #[test]
    fn test_drop_returns_segments_to_allocator() {
        let host = Arc::new(HostAllocator::new());
        {
            let pool = Arc::new(MemoryPool::new(host.clone()));
            let _buf = pool.allocate(10, 0, StreamHandle::DEFAULT).unwrap();
            assert_eq!(host.in_use(), SEGMENT_GRANULARITY);
        }
        assert_eq!(host.in_use(), 0);
    }

    #[test]
    fn test_pool_concurrent_allocate() {
        let pool = host_pool();
        let mut handles = vec![];

        for i in 0..4usize {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let stream = StreamHandle::from_raw(0x100 + i);
                let buffers: Vec<_> = (0..50)
                    .map(|_| pool.allocate(2048, 0, stream).unwrap())
                    .collect();
                buffers.len()
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 200);
        // All buffers dropped inside the threads.
        assert_eq!(pool.allocated_bytes(), 0);
        assert_eq!(pool.segment_count(), 4);
    }
}
