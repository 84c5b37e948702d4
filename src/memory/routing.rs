//! Per-thread allocation routing.
//!
//! The generic device allocator asks [`current_pool`] before serving a
//! request; when a [`PoolContext`] is entered on the calling thread, the
//! request goes to that pool instead of the default allocator. Contexts nest;
//! the most recently entered one that is still live wins.
//!
//! Guards may be dropped in any order. Each guard removes only its own route,
//! so ending an outer context leaves inner ones routing.

use super::{DeviceBuffer, MemoryPool, PoolId};
use crate::error::Result;
use crate::runtime::{DeviceId, StreamHandle};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;

struct Route {
    token: u64,
    pool: Arc<MemoryPool>,
}

thread_local! {
    static ROUTES: RefCell<Vec<Route>> = const { RefCell::new(Vec::new()) };
    static NEXT_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Allocation-context handle for a pool.
///
/// Holding a context does nothing by itself; [`enter`](Self::enter) starts
/// routing the current thread's allocations into the pool until the returned
/// guard is dropped.
#[derive(Clone, Debug)]
pub struct PoolContext {
    pool: Arc<MemoryPool>,
}

impl PoolContext {
    /// Create a context for `pool`.
    pub fn new(pool: Arc<MemoryPool>) -> Self {
        Self { pool }
    }

    /// The pool this context routes into.
    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    /// Start routing allocations on the current thread into the pool.
    pub fn enter(&self) -> RoutingGuard {
        let token = NEXT_TOKEN.with(|next| {
            let token = next.get();
            next.set(token.wrapping_add(1));
            token
        });
        let depth = ROUTES.with(|routes| {
            let mut routes = routes.borrow_mut();
            routes.push(Route {
                token,
                pool: Arc::clone(&self.pool),
            });
            routes.len()
        });
        tracing::trace!(pool = %self.pool.id(), depth = depth, "routing allocations to pool");
        RoutingGuard {
            pool: self.pool.id(),
            token,
            _not_send: PhantomData,
        }
    }
}

/// Active routing on the current thread. Dropping it stops the routing.
///
/// Not `Send`: routing state is thread-local.
#[must_use = "routing stops as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RoutingGuard {
    pool: PoolId,
    token: u64,
    _not_send: PhantomData<*const ()>,
}

impl RoutingGuard {
    /// The pool being routed to.
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// Stop routing. Equivalent to dropping the guard.
    pub fn exit(self) {}
}

impl Drop for RoutingGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread exit.
        let _ = ROUTES.try_with(|routes| {
            let mut routes = routes.borrow_mut();
            if let Some(index) = routes.iter().rposition(|r| r.token == self.token) {
                if index + 1 != routes.len() {
                    tracing::debug!(pool = %self.pool, "routing ended out of order");
                }
                routes.remove(index);
            }
        });
        tracing::trace!(pool = %self.pool, "routing to pool ended");
    }
}

/// The pool the current thread's allocations are routed to, if any.
pub fn current_pool() -> Option<Arc<MemoryPool>> {
    ROUTES.with(|routes| routes.borrow().last().map(|r| Arc::clone(&r.pool)))
}

/// Serve an allocation from the routed pool.
///
/// Returns `Ok(None)` when no pool is routed on this thread, in which case
/// the caller's default allocator should serve the request.
pub fn allocate(size: usize, device: DeviceId, stream: StreamHandle) -> Result<Option<DeviceBuffer>> {
    match current_pool() {
        Some(pool) => pool.allocate(size, device, stream).map(Some),
        None => Ok(None),
    }
}
