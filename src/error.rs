//! Error types for symm-mem.

use crate::capability::CommVersion;
use crate::plugin::PluginError;
use thiserror::Error;

/// Result type alias using symm-mem's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for symm-mem operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The communication group has no point-to-point communicator.
    ///
    /// Symmetric memory needs the group's NCCL communicator to register
    /// windows; entering a scope without one is a configuration bug.
    #[error("symmetric memory requires a point-to-point communicator in group '{group}'")]
    MissingCommunicator {
        /// Name of the offending group.
        group: String,
    },

    /// The communicator is too old to support symmetric windows.
    #[error("communicator version {found} is too old for symmetric memory (need {required} or newer)")]
    UnsupportedCommVersion {
        /// Version reported by the communicator.
        found: CommVersion,
        /// Minimum supported version.
        required: CommVersion,
    },

    /// A scope was entered under graph capture before the capture driver
    /// published its graph pool id.
    #[error("graph pool id is not set under graph capture")]
    GraphPoolIdUnset,

    /// The backing allocator returned a null pointer.
    #[error("device allocation of {size} bytes failed on device {device}")]
    AllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Target device.
        device: i32,
    },

    /// A pointer handed back to the pool was never allocated by it.
    #[error("pointer {0:#x} does not belong to this pool")]
    InvalidFree(usize),

    /// The native allocator plugin could not be built.
    #[error("failed to build allocator plugin: {0}")]
    PluginBuild(String),

    /// The native allocator plugin could not be loaded.
    #[error(transparent)]
    PluginLoad(#[from] PluginError),

    /// The communicator rejected a window registration.
    #[error("window registration of {size} bytes at {address:#x} failed: {reason}")]
    Registration {
        /// Segment base address.
        address: usize,
        /// Segment size in bytes.
        size: usize,
        /// Reason reported by the communicator.
        reason: String,
    },

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error reports a caller-side precondition violation.
    ///
    /// These are fatal: the scope never became active and nothing was routed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::MissingCommunicator { .. }
                | Error::UnsupportedCommVersion { .. }
                | Error::GraphPoolIdUnset
        )
    }
}
