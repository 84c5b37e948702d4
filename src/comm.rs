//! Communication group seam.
//!
//! Group bring-up, ranks and topology live elsewhere. A scope needs only the
//! group's size and name, and the point-to-point communicator that accepts
//! window registrations.

use crate::capability::CommVersion;
use crate::error::Result;

/// A collective-communication group the calling rank belongs to.
pub trait CommGroup {
    /// Number of ranks in the group.
    fn world_size(&self) -> usize;

    /// Group name, used in diagnostics.
    fn group_name(&self) -> &str;

    /// The group's point-to-point communicator, if one was brought up.
    fn comm(&self) -> Option<&dyn PointToPointComm>;
}

/// The NCCL-backed point-to-point communicator of a group.
pub trait PointToPointComm {
    /// Version of the communication library backing this communicator.
    fn version(&self) -> CommVersion;

    /// Register `size` bytes at `address` as a symmetric window.
    ///
    /// The range must be a whole pool segment obtained from the
    /// communication library's own allocator. Called with no tracker lock
    /// held, so implementations may query the
    /// [`RegistrationTracker`](crate::tracker::RegistrationTracker).
    fn register_comm_window_raw(&self, address: usize, size: usize) -> Result<()>;
}

/// Anything backed by a device storage allocation that can be tagged as
/// symmetric.
pub trait SymmetricStorage {
    /// Base address of the underlying storage.
    fn storage_ptr(&self) -> usize;
}

impl SymmetricStorage for usize {
    fn storage_ptr(&self) -> usize {
        *self
    }
}

impl<T: SymmetricStorage + ?Sized> SymmetricStorage for &T {
    fn storage_ptr(&self) -> usize {
        (**self).storage_ptr()
    }
}
