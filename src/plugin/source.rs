//! The embedded native allocator source and its ABI.

use std::ffi::{c_int, c_void};

/// Base name of the plugin library (without platform extension).
pub const LIBRARY_NAME: &str = "nccl_allocator";

/// Exported allocation entry point.
pub const ALLOC_SYMBOL: &[u8] = b"nccl_alloc_plug\0";

/// Exported free entry point.
pub const FREE_SYMBOL: &[u8] = b"nccl_free_plug\0";

/// `void* nccl_alloc_plug(size_t size, int device, void* stream)`
pub type AllocFn = unsafe extern "C" fn(usize, c_int, *mut c_void) -> *mut c_void;

/// `void nccl_free_plug(void* ptr, size_t size, int device, void* stream)`
pub type FreeFn = unsafe extern "C" fn(*mut c_void, usize, c_int, *mut c_void);

/// C++ source of the plugin.
///
/// Delegates to NCCL's own allocator so every segment is eligible for
/// window registration. A failed allocation yields NULL.
pub const NCCL_ALLOCATOR_SOURCE: &str = r#"#include <nccl.h>
extern "C" {

void* nccl_alloc_plug(size_t size, int device, void* stream) {
  void* ptr = NULL;
  if (ncclMemAlloc(&ptr, size) != ncclSuccess) {
    return NULL;
  }
  return ptr;
}

void nccl_free_plug(void* ptr, size_t size, int device, void* stream) {
  ncclMemFree(ptr);
}

}
"#;

/// File name of the built plugin on this platform, e.g. `nccl_allocator.so`.
pub fn artifact_file_name() -> String {
    format!("{}.{}", LIBRARY_NAME, std::env::consts::DLL_EXTENSION)
}
