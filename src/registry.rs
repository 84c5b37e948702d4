//! Shared memory pool registry.
//!
//! [`SymmetricMemory`] is the process-wide context object: it owns the
//! capability gate, the lazily built shared [`MemoryPool`], the
//! [`RegistrationTracker`], and the graph pool id published by the capture
//! driver. Scopes borrow it rather than reaching for hidden globals; the
//! process-wide instance is available through [`SymmetricMemory::global`].

use crate::capability::CapabilityGate;
use crate::comm::{CommGroup, SymmetricStorage};
use crate::config::SymmMemConfig;
use crate::error::Result;
use crate::memory::{DeviceAllocator, MemoryPool};
use crate::plugin::NativePlugin;
use crate::runtime::{DeviceRuntime, GraphPoolId};
use crate::scope::{ScopeGuard, ScopeOptions, SymmetricMemoryScope};
use crate::tracker::RegistrationTracker;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Produces the backing allocator for the shared pool.
///
/// Called at most once per [`SymmetricMemory`].
pub trait AllocatorSource: Send + Sync {
    /// Build or load the allocator.
    fn load(&self) -> Result<Arc<dyn DeviceAllocator>>;
}

impl<F> AllocatorSource for F
where
    F: Fn() -> Result<Arc<dyn DeviceAllocator>> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn DeviceAllocator>> {
        self()
    }
}

static GLOBAL: OnceLock<SymmetricMemory> = OnceLock::new();

/// Process-wide symmetric memory state.
pub struct SymmetricMemory {
    gate: CapabilityGate,
    source: Box<dyn AllocatorSource>,
    /// One-time-init slot for the shared pool.
    pool: Mutex<Option<Arc<MemoryPool>>>,
    tracker: RegistrationTracker,
    graph_pool_id: RwLock<Option<GraphPoolId>>,
}

impl SymmetricMemory {
    /// Create a context whose pool draws from `source`.
    pub fn new(config: &SymmMemConfig, source: impl AllocatorSource + 'static) -> Self {
        Self {
            gate: CapabilityGate::new(config.enable_symm_mem),
            source: Box::new(source),
            pool: Mutex::new(None),
            tracker: RegistrationTracker::new(),
            graph_pool_id: RwLock::new(None),
        }
    }

    /// Create a context backed by the native NCCL allocator plugin.
    pub fn from_config(config: &SymmMemConfig) -> Self {
        Self::new(config, NativePlugin::new(&config.plugin))
    }

    /// The process-wide instance.
    ///
    /// Created on first use from [`SymmMemConfig::from_env`] unless
    /// [`install`](Self::install) ran first.
    pub fn global() -> &'static SymmetricMemory {
        GLOBAL.get_or_init(|| Self::from_config(&SymmMemConfig::from_env()))
    }

    /// Install `instance` as the process-wide instance.
    ///
    /// Fails, handing the instance back, if [`global`](Self::global) was
    /// already initialised.
    pub fn install(instance: SymmetricMemory) -> std::result::Result<(), SymmetricMemory> {
        GLOBAL.set(instance)
    }

    /// Whether symmetric memory is enabled.
    pub fn is_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// Enable or disable symmetric memory for scopes constructed afterwards.
    pub fn set_enabled(&self, enabled: bool) {
        self.gate.set_enabled(enabled);
    }

    /// The capability gate.
    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    /// The shared pool, constructing it on first call.
    ///
    /// Every call returns the same pool. Construction runs under a lock, so
    /// concurrent first calls load the allocator once.
    pub fn get_pool(&self) -> Result<Arc<MemoryPool>> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let allocator = self.source.load()?;
        let pool = Arc::new(MemoryPool::new(allocator));
        tracing::info!(
            pool = %pool.id(),
            allocator = pool.allocator_name(),
            "symmetric memory pool created"
        );
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Whether the shared pool has been constructed.
    pub fn has_pool(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Publish the graph pool id of the current capture session.
    pub fn set_graph_pool_id(&self, id: GraphPoolId) {
        tracing::debug!(pool = %id, "graph pool id set");
        *self.graph_pool_id.write() = Some(id);
    }

    /// The published graph pool id, if any.
    pub fn graph_pool_id(&self) -> Option<GraphPoolId> {
        *self.graph_pool_id.read()
    }

    /// The registration tracker.
    pub fn tracker(&self) -> &RegistrationTracker {
        &self.tracker
    }

    /// Whether `storage` was tagged as symmetric.
    pub fn is_symmetric(&self, storage: impl SymmetricStorage) -> bool {
        self.tracker.is_symmetric(storage)
    }

    /// Construct a scope for `group`.
    ///
    /// Builds the shared pool if the scope is not disabled.
    pub fn scope<'a>(
        &'a self,
        group: &'a dyn CommGroup,
        runtime: &'a dyn DeviceRuntime,
        options: ScopeOptions,
    ) -> Result<SymmetricMemoryScope<'a>> {
        SymmetricMemoryScope::new(self, group, runtime, options)
    }

    /// Run `f` inside an entered scope, then close it.
    ///
    /// Errors from entering or closing the scope are returned; `f`'s value is
    /// discarded if closing fails.
    pub fn with_symmetric_memory<R>(
        &self,
        group: &dyn CommGroup,
        runtime: &dyn DeviceRuntime,
        options: ScopeOptions,
        f: impl FnOnce(&ScopeGuard<'_>) -> R,
    ) -> Result<R> {
        let mut guard = self.scope(group, runtime, options)?.enter()?;
        let value = f(&guard);
        guard.close()?;
        Ok(value)
    }
}

impl fmt::Debug for SymmetricMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricMemory")
            .field("enabled", &self.is_enabled())
            .field("pool", &*self.pool.lock())
            .field("graph_pool_id", &self.graph_pool_id())
            .field("tracker", &self.tracker)
            .finish()
    }
}
