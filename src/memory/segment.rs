//! Pool segment bookkeeping and snapshot records.

use crate::runtime::{DeviceId, StreamHandle};
use std::collections::BTreeMap;

/// One segment as reported by [`MemoryPool::snapshot`](super::MemoryPool::snapshot).
///
/// A segment is a single allocation obtained from the backing allocator;
/// its base address is what gets registered with the communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentInfo {
    /// Base address of the segment.
    pub address: usize,
    /// Size of the segment in bytes.
    pub total_size: usize,
    /// Bytes currently handed out from this segment.
    pub allocated_size: usize,
    /// Number of live blocks carved from this segment.
    pub active_blocks: usize,
    /// Device the segment lives on.
    pub device: DeviceId,
    /// Stream the segment was allocated for.
    pub stream: StreamHandle,
}

impl SegmentInfo {
    /// Whether the segment belongs to the default stream.
    pub fn on_default_stream(&self) -> bool {
        self.stream.is_default()
    }

    /// Whether `ptr` falls inside this segment.
    pub fn contains(&self, ptr: usize) -> bool {
        ptr >= self.address && ptr - self.address < self.total_size
    }
}

/// A live segment inside the pool.
///
/// Blocks are kept as `offset -> size` in address order; new blocks go into
/// the first gap large enough.
#[derive(Debug)]
pub(super) struct Segment {
    pub(super) device: DeviceId,
    pub(super) stream: StreamHandle,
    pub(super) size: usize,
    blocks: BTreeMap<usize, usize>,
    allocated: usize,
}

impl Segment {
    pub(super) fn new(device: DeviceId, stream: StreamHandle, size: usize) -> Self {
        Self {
            device,
            stream,
            size,
            blocks: BTreeMap::new(),
            allocated: 0,
        }
    }

    pub(super) fn serves(&self, device: DeviceId, stream: StreamHandle) -> bool {
        self.device == device && self.stream == stream
    }

    /// Carve `size` bytes out of the first fitting gap, returning the offset.
    pub(super) fn carve(&mut self, size: usize) -> Option<usize> {
        let mut cursor = 0;
        let mut found = None;
        for (&offset, &len) in &self.blocks {
            if offset - cursor >= size {
                found = Some(cursor);
                break;
            }
            cursor = offset + len;
        }
        let offset = match found {
            Some(offset) => offset,
            None if self.size - cursor >= size => cursor,
            None => return None,
        };
        self.blocks.insert(offset, size);
        self.allocated += size;
        Some(offset)
    }

    /// Return the block at `offset`. Returns its size, or `None` if no block
    /// starts there.
    pub(super) fn release(&mut self, offset: usize) -> Option<usize> {
        let size = self.blocks.remove(&offset)?;
        self.allocated -= size;
        Some(size)
    }

    pub(super) fn info(&self, address: usize) -> SegmentInfo {
        SegmentInfo {
            address,
            total_size: self.size,
            allocated_size: self.allocated,
            active_blocks: self.blocks.len(),
            device: self.device,
            stream: self.stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carve_first_fit() {
        let mut seg = Segment::new(0, StreamHandle::DEFAULT, 4096);
        assert_eq!(seg.carve(1024), Some(0));
        assert_eq!(seg.carve(1024), Some(1024));
        assert_eq!(seg.carve(1024), Some(2048));

        // Free the middle block and refill the hole.
        assert_eq!(seg.release(1024), Some(1024));
        assert_eq!(seg.carve(512), Some(1024));
        assert_eq!(seg.carve(512), Some(1536));
        assert_eq!(seg.carve(1024), Some(3072));
        assert_eq!(seg.carve(1), None);
    }

    #[test]
    fn test_release_unknown_offset() {
        let mut seg = Segment::new(0, StreamHandle::DEFAULT, 4096);
        seg.carve(1024);
        assert_eq!(seg.release(512), None);
        assert_eq!(seg.info(0x1000).allocated_size, 1024);
    }

    #[test]
    fn test_info_contains() {
        let mut seg = Segment::new(1, StreamHandle::from_raw(7), 4096);
        seg.carve(100);
        let info = seg.info(0x10000);
        assert_eq!(info.active_blocks, 1);
        assert_eq!(info.device, 1);
        assert!(!info.on_default_stream());
        assert!(info.contains(0x10000));
        assert!(info.contains(0x10fff));
        assert!(!info.contains(0x11000));
        assert!(!info.contains(0xffff));
    }
}
