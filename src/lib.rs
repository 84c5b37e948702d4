//! # symm-mem
//!
//! Symmetric device-memory allocation for ranks of a collective-communication
//! group.
//!
//! Buffers allocated inside a [`scope`] come from one shared, process-wide
//! [`MemoryPool`] backed by NCCL's own allocator. When the scope closes, every
//! pool segment the communicator has not seen yet is registered as a
//! symmetric window, letting collectives transfer peer-to-peer without staging
//! copies.
//!
//! ## Features
//!
//! - **Native allocator plugin**: compiled once, cached on disk, loaded with
//!   `libloading`
//! - **Lazily built shared pool**: one per process, constructed under a lock
//! - **Idempotent registration**: segments are registered exactly once
//! - **Graph capture aware**: capture routing is paused while a scope is
//!   active, for both runtime API generations
//! - **Toggle-safe**: a disabled scope is a pure pass-through
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use symm_mem::prelude::*;
//!
//! let symm = SymmetricMemory::global();
//! symm.with_symmetric_memory(&group, &runtime, ScopeOptions::default(), |scope| {
//!     let buffer = symm_mem::memory::allocate(1 << 20, 0, runtime.current_stream())?;
//!     if let Some(buffer) = &buffer {
//!         scope.tag(buffer);
//!     }
//!     Ok::<_, Error>(buffer)
//! })??;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod capability;
pub mod comm;
pub mod config;
pub mod error;
pub mod memory;
pub mod observability;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod scope;
pub mod tracker;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::capability::{CommVersion, PoolPauseApi, RuntimeVersion};
    pub use crate::comm::{CommGroup, PointToPointComm, SymmetricStorage};
    pub use crate::config::SymmMemConfig;
    pub use crate::error::{Error, Result};
    pub use crate::memory::{DeviceAllocator, DeviceBuffer, MemoryPool};
    pub use crate::registry::{AllocatorSource, SymmetricMemory};
    pub use crate::runtime::{DeviceRuntime, GraphPoolId, StreamHandle};
    pub use crate::scope::{ExitReport, ScopeGuard, ScopeOptions, ScopeState};
}

pub use error::{Error, Result};
pub use memory::MemoryPool;
pub use registry::SymmetricMemory;
