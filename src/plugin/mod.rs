//! Native allocator plugin.
//!
//! The pool's segments must come from NCCL's own allocator to be eligible
//! for symmetric window registration. This module builds a tiny shared
//! library wrapping `ncclMemAlloc`/`ncclMemFree` behind the generic
//! allocator's plugin ABI:
//!
//! ```c
//! void* nccl_alloc_plug(size_t size, int device, void* stream);
//! void  nccl_free_plug(void* ptr, size_t size, int device, void* stream);
//! ```
//!
//! [`PluginBuilder`] compiles it once into the build directory,
//! [`AllocatorBinding`] loads it and exposes it as a
//! [`DeviceAllocator`](crate::memory::DeviceAllocator), and [`NativePlugin`]
//! ties both together as the default
//! [`AllocatorSource`](crate::registry::AllocatorSource).

mod builder;
mod loader;
mod source;

pub use builder::PluginBuilder;
pub use loader::{AllocatorBinding, PluginError};
pub use source::{
    ALLOC_SYMBOL, AllocFn, FREE_SYMBOL, FreeFn, LIBRARY_NAME, NCCL_ALLOCATOR_SOURCE,
    artifact_file_name,
};

use crate::config::PluginConfig;
use crate::error::Result;
use crate::memory::DeviceAllocator;
use crate::registry::AllocatorSource;
use std::sync::Arc;

/// Allocator source that builds (or reuses) and loads the native plugin.
#[derive(Debug, Clone)]
pub struct NativePlugin {
    builder: PluginBuilder,
}

impl NativePlugin {
    /// Create a source from plugin configuration.
    pub fn new(config: &PluginConfig) -> Self {
        Self {
            builder: PluginBuilder::from_config(config),
        }
    }

    /// The builder used to produce the artifact.
    pub fn builder(&self) -> &PluginBuilder {
        &self.builder
    }
}

impl AllocatorSource for NativePlugin {
    fn load(&self) -> Result<Arc<dyn DeviceAllocator>> {
        let path = self.builder.ensure_built()?;
        // SAFETY: the artifact was produced from NCCL_ALLOCATOR_SOURCE, which
        // exports both entry points with the expected signatures.
        let binding = unsafe { AllocatorBinding::load(&path)? };
        Ok(Arc::new(binding))
    }
}
