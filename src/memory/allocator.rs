//! Backing allocators for the memory pool.

use crate::runtime::{DeviceId, StreamHandle};
use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Uniform allocate/free interface a pool draws segments from.
///
/// Mirrors the plugin ABI of the generic device allocator: `allocate` returns
/// null on failure instead of an error, and `free` receives the same size,
/// device and stream the block was allocated with.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate `size` bytes on `device` for use on `stream`.
    ///
    /// Returns null if the allocation cannot be satisfied.
    fn allocate(&self, size: usize, device: DeviceId, stream: StreamHandle) -> *mut c_void;

    /// Release memory previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `size`, and must not be freed twice.
    unsafe fn free(&self, ptr: *mut c_void, size: usize, device: DeviceId, stream: StreamHandle);

    /// Short name for diagnostics.
    fn name(&self) -> &str;
}

/// Alignment of every host allocation, matching device allocation granularity.
const HOST_ALIGNMENT: usize = 256;

/// Host-memory allocator.
///
/// Stands in for device memory on CPU-only hosts and in tests. Device and
/// stream arguments are ignored. An optional byte limit makes it refuse
/// allocations the way an exhausted device would.
#[derive(Debug)]
pub struct HostAllocator {
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl HostAllocator {
    /// Create an unbounded host allocator.
    pub fn new() -> Self {
        Self {
            limit: None,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Create a host allocator that fails once `limit` bytes are outstanding.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, size: usize) -> bool {
        let Some(limit) = self.limit else {
            self.in_use.fetch_add(size, Ordering::AcqRel);
            return true;
        };
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= limit)
            })
            .is_ok()
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAllocator for HostAllocator {
    fn allocate(&self, size: usize, _device: DeviceId, _stream: StreamHandle) -> *mut c_void {
        let Ok(layout) = Layout::from_size_align(size, HOST_ALIGNMENT) else {
            return std::ptr::null_mut();
        };
        if size == 0 || !self.reserve(size) {
            return std::ptr::null_mut();
        }

        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            self.in_use.fetch_sub(size, Ordering::AcqRel);
        }
        ptr.cast()
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize, _device: DeviceId, _stream: StreamHandle) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: allocate() accepted this size, so the layout is valid.
        let layout = unsafe { Layout::from_size_align_unchecked(size, HOST_ALIGNMENT) };
        // SAFETY: caller guarantees ptr came from allocate() with this size.
        unsafe { alloc::dealloc(ptr.cast(), layout) };
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }

    fn name(&self) -> &str {
        "host"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocate_and_free() {
        let alloc = HostAllocator::new();
        let ptr = alloc.allocate(4096, 0, StreamHandle::DEFAULT);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % HOST_ALIGNMENT, 0);
        assert_eq!(alloc.in_use(), 4096);

        unsafe { alloc.free(ptr, 4096, 0, StreamHandle::DEFAULT) };
        assert_eq!(alloc.in_use(), 0);
    }

    #[test]
    fn test_host_zero_size_is_null() {
        let alloc = HostAllocator::new();
        assert!(alloc.allocate(0, 0, StreamHandle::DEFAULT).is_null());
    }

    #[test]
    fn test_host_limit_returns_null() {
        let alloc = HostAllocator::with_limit(8192);
        let a = alloc.allocate(4096, 0, StreamHandle::DEFAULT);
        let b = alloc.allocate(4096, 0, StreamHandle::DEFAULT);
        let c = alloc.allocate(4096, 0, StreamHandle::DEFAULT);
        assert!(!a.is_null());
        assert!(!b.is_null());
        assert!(c.is_null());
        assert_eq!(alloc.in_use(), 8192);

        unsafe {
            alloc.free(a, 4096, 0, StreamHandle::DEFAULT);
            alloc.free(b, 4096, 0, StreamHandle::DEFAULT);
        }
        assert_eq!(alloc.in_use(), 0);
    }
}
