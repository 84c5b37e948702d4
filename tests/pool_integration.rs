//! Integration tests for the shared pool and per-thread routing.

use std::sync::Arc;
use std::thread;
use symm_mem::memory::{self, HostAllocator, MemoryPool, PoolContext, SEGMENT_GRANULARITY};
use symm_mem::runtime::StreamHandle;

fn host_pool() -> Arc<MemoryPool> {
    Arc::new(MemoryPool::new(Arc::new(HostAllocator::new())))
}

/// Routing on one thread does not leak into another.
#[test]
fn test_routing_is_per_thread() {
    let pool = host_pool();
    let ctx = PoolContext::new(Arc::clone(&pool));
    let _guard = ctx.enter();

    let other = thread::spawn(|| memory::current_pool().is_none());
    assert!(other.join().unwrap());

    let here = memory::allocate(256, 0, StreamHandle::DEFAULT).unwrap();
    assert!(here.is_some());
}

/// Nested contexts route to the innermost pool and unwind in order.
#[test]
fn test_nested_contexts() {
    let outer = host_pool();
    let inner = host_pool();

    let outer_guard = PoolContext::new(Arc::clone(&outer)).enter();
    {
        let _inner_guard = PoolContext::new(Arc::clone(&inner)).enter();
        let buf = memory::allocate(64, 0, StreamHandle::DEFAULT).unwrap().unwrap();
        assert_eq!(buf.pool().id(), inner.id());
    }
    let buf = memory::allocate(64, 0, StreamHandle::DEFAULT).unwrap().unwrap();
    assert_eq!(buf.pool().id(), outer.id());
    outer_guard.exit();

    assert!(memory::current_pool().is_none());
}

/// Concurrent allocations from many threads keep the pool consistent.
#[test]
fn test_concurrent_allocations() {
    let pool = host_pool();
    let stream = StreamHandle::from_raw(0x42);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let ctx = PoolContext::new(pool);
                let _guard = ctx.enter();
                let buffers: Vec<_> = (0..64)
                    .map(|_| memory::allocate(4096, 0, stream).unwrap().unwrap())
                    .collect();
                buffers.iter().map(|b| b.as_ptr()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut addresses: Vec<usize> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let total = addresses.len();
    addresses.sort_unstable();
    addresses.dedup();

    // Blocks were live at the same time within a thread, so each thread's
    // addresses are distinct; all buffers are freed now.
    assert!(addresses.len() >= 64);
    assert_eq!(total, 256);
    assert_eq!(pool.allocated_bytes(), 0);
    assert!(pool.reserved_bytes() >= SEGMENT_GRANULARITY);
    assert!(pool.snapshot().iter().all(|s| s.active_blocks == 0));
}
