//! Loading the allocator plugin with libloading.

use super::source::{ALLOC_SYMBOL, AllocFn, FREE_SYMBOL, FreeFn};
use crate::memory::DeviceAllocator;
use crate::runtime::{DeviceId, StreamHandle};
use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when loading the allocator plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Failed to load the shared library.
    #[error("failed to load allocator plugin {path}: {reason}")]
    LoadFailed {
        /// Library path.
        path: PathBuf,
        /// Loader error.
        reason: String,
    },

    /// The library does not export a required entry point.
    #[error("allocator plugin {path} does not export '{symbol}'")]
    MissingSymbol {
        /// Library path.
        path: PathBuf,
        /// Name of the missing symbol.
        symbol: &'static str,
    },
}

/// The pair of native allocate/free entry points of a loaded plugin.
///
/// Bound once; the function pointers stay valid because the binding keeps
/// the library loaded.
pub struct AllocatorBinding {
    alloc: AllocFn,
    free: FreeFn,
    path: PathBuf,
    /// The loaded library (kept alive).
    _library: Arc<Library>,
}

impl AllocatorBinding {
    /// Load the plugin at `path` and resolve both entry points.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initialisers, and the exported symbols are
    /// trusted to have the [`AllocFn`]/[`FreeFn`] signatures.
    pub unsafe fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();

        // SAFETY: caller trusts the library.
        let library = unsafe {
            Library::new(path).map_err(|e| PluginError::LoadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        };

        // SAFETY: caller guarantees the symbol signatures.
        let alloc: AllocFn = unsafe { *resolve::<AllocFn>(&library, path, ALLOC_SYMBOL)? };
        // SAFETY: as above.
        let free: FreeFn = unsafe { *resolve::<FreeFn>(&library, path, FREE_SYMBOL)? };

        tracing::debug!(path = %path.display(), "allocator plugin loaded");

        Ok(Self {
            alloc,
            free,
            path: path.to_path_buf(),
            _library: Arc::new(library),
        })
    }

    /// Path the plugin was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Look up `symbol` in `library`.
///
/// # Safety
///
/// `T` must match the symbol's real type.
unsafe fn resolve<'lib, T>(
    library: &'lib Library,
    path: &Path,
    symbol: &'static [u8],
) -> Result<Symbol<'lib, T>, PluginError> {
    // SAFETY: forwarded to the caller.
    unsafe { library.get(symbol) }.map_err(|_| PluginError::MissingSymbol {
        path: path.to_path_buf(),
        symbol: symbol_name(symbol),
    })
}

fn symbol_name(symbol: &'static [u8]) -> &'static str {
    std::str::from_utf8(symbol.strip_suffix(&[0]).unwrap_or(symbol)).unwrap_or("<non-utf8>")
}

impl DeviceAllocator for AllocatorBinding {
    fn allocate(&self, size: usize, device: DeviceId, stream: StreamHandle) -> *mut c_void {
        // SAFETY: the entry point has the AllocFn signature and reports
        // failure by returning null.
        unsafe { (self.alloc)(size, device, stream.as_ptr()) }
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize, device: DeviceId, stream: StreamHandle) {
        // SAFETY: caller guarantees ptr came from allocate().
        unsafe { (self.free)(ptr, size, device, stream.as_ptr()) }
    }

    fn name(&self) -> &str {
        "nccl"
    }
}

impl std::fmt::Debug for AllocatorBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorBinding")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_plugin() {
        let result = unsafe { AllocatorBinding::load("/nonexistent/nccl_allocator.so") };
        assert!(matches!(result, Err(PluginError::LoadFailed { .. })));
    }

    #[test]
    fn test_load_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nccl_allocator.so");
        std::fs::write(&path, b"not a shared object").unwrap();

        let err = unsafe { AllocatorBinding::load(&path) }.unwrap_err();
        assert!(err.to_string().contains("nccl_allocator.so"));
    }

    #[test]
    fn test_symbol_name() {
        assert_eq!(symbol_name(ALLOC_SYMBOL), "nccl_alloc_plug");
        assert_eq!(symbol_name(FREE_SYMBOL), "nccl_free_plug");
    }
}
