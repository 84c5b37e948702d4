//! Device runtime seam.
//!
//! The device runtime (current device, streams, graph capture) belongs to the
//! host framework. This crate only needs a handful of calls from it, gathered
//! in [`DeviceRuntime`].

use crate::capability::RuntimeVersion;
use std::fmt;

/// Device ordinal.
pub type DeviceId = i32;

/// Raw stream handle as seen by the device allocator.
///
/// The legacy default stream is the null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamHandle(usize);

impl StreamHandle {
    /// The default (untagged) stream.
    pub const DEFAULT: StreamHandle = StreamHandle(0);

    /// Wrap a raw stream handle value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub const fn as_raw(&self) -> usize {
        self.0
    }

    /// The handle as an opaque pointer, for passing through FFI.
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }

    /// Whether this is the default stream.
    pub const fn is_default(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Identifier of the memory pool a graph capture allocates from.
///
/// Opaque to this crate; handed back verbatim to the runtime's pause and
/// resume primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphPoolId(pub u64, pub u64);

impl fmt::Display for GraphPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

/// The calls this crate makes into the host device runtime.
///
/// The four pool primitives come in two generations; which pair is valid
/// depends on [`DeviceRuntime::version`] (see
/// [`PoolPauseApi`](crate::capability::PoolPauseApi)). Implementations for
/// one generation may treat the other pair as unreachable.
pub trait DeviceRuntime {
    /// The device the calling thread currently targets.
    fn current_device(&self) -> DeviceId;

    /// The stream the calling thread currently issues work on.
    fn current_stream(&self) -> StreamHandle;

    /// Whether the current stream is recording a graph capture.
    fn is_current_stream_capturing(&self) -> bool;

    /// The runtime's version.
    fn version(&self) -> RuntimeVersion;

    /// Pre-threshold pause: stop routing current-stream allocations into
    /// the capture pool.
    fn end_allocate_current_stream_to_pool(&self, device: DeviceId, pool: GraphPoolId);

    /// Pre-threshold resume: route allocations into the capture pool again.
    fn begin_allocate_to_pool(&self, device: DeviceId, pool: GraphPoolId);

    /// Post-threshold pause: stop routing allocations into the capture pool.
    fn end_allocate_to_pool(&self, device: DeviceId, pool: GraphPoolId);

    /// Post-threshold resume: route the current thread's allocations into
    /// the capture pool again.
    fn begin_allocate_current_thread_to_pool(&self, device: DeviceId, pool: GraphPoolId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream() {
        assert!(StreamHandle::DEFAULT.is_default());
        assert!(StreamHandle::default().is_default());
        assert!(!StreamHandle::from_raw(0x7f00).is_default());
        assert!(StreamHandle::DEFAULT.as_ptr().is_null());
    }

    #[test]
    fn test_display() {
        assert_eq!(StreamHandle::DEFAULT.to_string(), "default");
        assert_eq!(StreamHandle::from_raw(0x10).to_string(), "0x10");
        assert_eq!(GraphPoolId(1, 0).to_string(), "(1, 0)");
    }
}
