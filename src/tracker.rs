//! Registration tracker.
//!
//! Two independent, append-only address sets:
//!
//! - **base addresses**: pool segments already registered as communication
//!   windows, so a segment is registered at most once;
//! - **tensor addresses**: storage explicitly tagged as living in symmetric
//!   memory, answering [`RegistrationTracker::is_symmetric`].
//!
//! Neither set exposes removal. Tagging goes through a scope, which ignores
//! tags while disabled:
//!
//! ```compile_fail
//! let tracker = symm_mem::tracker::RegistrationTracker::new();
//! tracker.tag(0x1000usize);
//! ```

use crate::comm::SymmetricStorage;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct BaseSet {
    registered: HashSet<usize>,
    /// Claimed by a registration pass, outcome pending.
    claimed: HashSet<usize>,
}

/// Tracks registered segments and tagged tensors.
#[derive(Debug, Default)]
pub struct RegistrationTracker {
    bases: Mutex<BaseSet>,
    tensor_addrs: Mutex<HashSet<usize>>,
}

impl RegistrationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `storage` as symmetric.
    pub(crate) fn tag(&self, storage: impl SymmetricStorage) {
        self.tensor_addrs.lock().insert(storage.storage_ptr());
    }

    /// Whether `storage` was tagged symmetric.
    pub fn is_symmetric(&self, storage: impl SymmetricStorage) -> bool {
        self.tensor_addrs.lock().contains(&storage.storage_ptr())
    }

    /// Whether a segment base address has been registered.
    pub fn is_base_registered(&self, address: usize) -> bool {
        self.bases.lock().registered.contains(&address)
    }

    /// Number of registered segment bases.
    pub fn registered_base_count(&self) -> usize {
        self.bases.lock().registered.len()
    }

    /// Number of tagged tensor addresses.
    pub fn tagged_tensor_count(&self) -> usize {
        self.tensor_addrs.lock().len()
    }

    /// Run `f` with exclusive access to the base addresses, to decide which
    /// segments this pass will register.
    ///
    /// Addresses claimed in `f` are invisible to other passes until
    /// [`settle`](Self::settle) is called for them, so a segment is never
    /// registered twice. The lock is released before any registration call.
    pub(crate) fn with_base_addrs<R>(&self, f: impl FnOnce(&mut BaseAddrs<'_>) -> R) -> R {
        let mut bases = self.bases.lock();
        f(&mut BaseAddrs { bases: &mut *bases })
    }

    /// Resolve a claim: record the address if it was registered, otherwise
    /// release it for a later pass.
    pub(crate) fn settle(&self, address: usize, registered: bool) {
        let mut bases = self.bases.lock();
        bases.claimed.remove(&address);
        if registered {
            bases.registered.insert(address);
        }
    }
}

/// Locked view of the base addresses.
pub(crate) struct BaseAddrs<'a> {
    bases: &'a mut BaseSet,
}

impl BaseAddrs<'_> {
    /// Whether the address is registered or being registered by another pass.
    pub(crate) fn is_known(&self, address: usize) -> bool {
        self.bases.registered.contains(&address) || self.bases.claimed.contains(&address)
    }

    /// Claim an unknown address for registration. Returns `false` if it is
    /// already known.
    pub(crate) fn claim(&mut self, address: usize) -> bool {
        !self.bases.registered.contains(&address) && self.bases.claimed.insert(address)
    }
}
