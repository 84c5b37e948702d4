//! Scoped symmetric-memory context.
//!
//! A scope routes every allocation made on the current thread into the
//! shared pool and, when it closes, registers the pool's new segments as
//! communication windows:
//!
//! ```text
//!            construct                enter                 close / drop
//!  ┌──────────┐  gate off,   ┌───────┐  checks ok   ┌────────┐          ┌────────┐
//!  │ Disabled │◄─ world 1, ──│ Armed │─────────────►│ Active │─────────►│ Closed │
//!  └──────────┘  opted out   └───────┘              └────────┘          └────────┘
//! ```
//!
//! A disabled scope is a pure pass-through: it never touches the pool, the
//! tracker, or the communicator.
//!
//! Under graph capture the capture pool's routing is paused while the scope
//! is active, so allocations made inside it land in the shared pool instead
//! of being recorded into the replay graph.

use crate::capability::{MIN_SYMMETRIC_COMM_VERSION, PoolPauseApi};
use crate::comm::{CommGroup, PointToPointComm, SymmetricStorage};
use crate::error::{Error, Result};
use crate::memory::{MemoryPool, PoolContext, RoutingGuard, SegmentInfo};
use crate::observability;
use crate::registry::SymmetricMemory;
use crate::runtime::{DeviceId, DeviceRuntime, GraphPoolId};
use std::fmt;
use std::sync::Arc;
use tracing::Span;

/// Caller options for a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeOptions {
    /// Opt out: the scope is constructed disabled.
    pub disabled: bool,
    /// Register default-stream segments even on runtimes with the pool
    /// snapshot defect.
    pub disable_war: bool,
}

impl ScopeOptions {
    /// Options for a disabled scope.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }
}

/// Lifecycle state of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeState {
    /// Pass-through; nothing is routed or registered.
    Disabled,
    /// Constructed and eligible, not yet entered.
    Armed,
    /// Allocations on this thread are routed to the shared pool.
    Active,
    /// Exit pass done.
    Closed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeState::Disabled => "disabled",
            ScopeState::Armed => "armed",
            ScopeState::Active => "active",
            ScopeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of a scope's exit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitReport {
    /// Segments newly registered.
    pub registered: usize,
    /// Bytes newly registered.
    pub registered_bytes: usize,
    /// Segments left unregistered by the default-stream rule.
    pub skipped: usize,
    /// Segments that were registered by an earlier scope.
    pub already_registered: usize,
}

struct Armed<'a> {
    group: &'a dyn CommGroup,
    runtime: &'a dyn DeviceRuntime,
    context: PoolContext,
    capturing: bool,
    device: DeviceId,
    pause_api: PoolPauseApi,
    disable_war: bool,
}

/// A constructed, not yet entered, scope.
pub struct SymmetricMemoryScope<'a> {
    owner: &'a SymmetricMemory,
    armed: Option<Armed<'a>>,
}

impl<'a> SymmetricMemoryScope<'a> {
    /// Construct a scope for `group`.
    ///
    /// The scope is disabled if `options` opts out, the gate is off, or the
    /// group has a single rank; otherwise the shared pool is obtained
    /// (building it on first use) and the runtime's state is recorded.
    pub fn new(
        owner: &'a SymmetricMemory,
        group: &'a dyn CommGroup,
        runtime: &'a dyn DeviceRuntime,
        options: ScopeOptions,
    ) -> Result<Self> {
        if options.disabled || !owner.is_enabled() || group.world_size() == 1 {
            tracing::trace!(
                group = group.group_name(),
                opted_out = options.disabled,
                world_size = group.world_size(),
                "symmetric memory scope disabled"
            );
            return Ok(Self { owner, armed: None });
        }

        let pool = owner.get_pool()?;
        let armed = Armed {
            group,
            runtime,
            context: PoolContext::new(pool),
            capturing: runtime.is_current_stream_capturing(),
            device: runtime.current_device(),
            pause_api: PoolPauseApi::for_version(&runtime.version()),
            disable_war: options.disable_war,
        };
        Ok(Self {
            owner,
            armed: Some(armed),
        })
    }

    /// Current state: [`ScopeState::Disabled`] or [`ScopeState::Armed`].
    pub fn state(&self) -> ScopeState {
        if self.armed.is_some() {
            ScopeState::Armed
        } else {
            ScopeState::Disabled
        }
    }

    /// Whether the current stream was capturing when the scope was armed.
    pub fn is_capturing(&self) -> bool {
        self.armed.as_ref().is_some_and(|a| a.capturing)
    }

    /// Pause/resume API generation, if armed.
    pub fn pause_api(&self) -> Option<PoolPauseApi> {
        self.armed.as_ref().map(|a| a.pause_api)
    }

    /// Tag `storage` as symmetric. No-op while disabled.
    pub fn tag(&self, storage: impl SymmetricStorage) {
        if self.armed.is_some() {
            self.owner.tracker().tag(storage);
        }
    }

    /// Enter the scope.
    ///
    /// Checks run before anything is paused or routed: the group must have a
    /// point-to-point communicator recent enough for symmetric windows, and
    /// under capture the graph pool id must be set. Any failure is a
    /// configuration bug and is returned as a precondition error.
    pub fn enter(self) -> Result<ScopeGuard<'a>> {
        let Some(armed) = self.armed else {
            return Ok(ScopeGuard {
                owner: self.owner,
                active: None,
                state: ScopeState::Disabled,
            });
        };

        let group = armed.group;
        let group_name = group.group_name();
        let comm = group.comm().ok_or_else(|| {
            tracing::error!(group = group_name, "no point-to-point communicator");
            Error::MissingCommunicator {
                group: group_name.to_string(),
            }
        })?;

        let version = comm.version();
        if !version.supports_symmetric_memory() {
            tracing::error!(
                group = group_name,
                version = %version,
                required = %MIN_SYMMETRIC_COMM_VERSION,
                "communicator too old for symmetric memory"
            );
            return Err(Error::UnsupportedCommVersion {
                found: version,
                required: MIN_SYMMETRIC_COMM_VERSION,
            });
        }

        let capture_pool = if armed.capturing {
            let id = self.owner.graph_pool_id().ok_or_else(|| {
                tracing::error!(group = group_name, "graph pool id unset under capture");
                Error::GraphPoolIdUnset
            })?;
            Some(id)
        } else {
            None
        };

        let span = observability::span_scope(group_name, armed.device, armed.capturing);
        let routing = span.in_scope(|| {
            if let Some(id) = capture_pool {
                pause_capture(armed.runtime, armed.pause_api, armed.device, id);
            }
            observability::record_scope_entered(group_name);
            armed.context.enter()
        });

        Ok(ScopeGuard {
            owner: self.owner,
            active: Some(Active {
                armed,
                comm,
                routing: Some(routing),
                capture_pool,
                span,
            }),
            state: ScopeState::Active,
        })
    }
}

impl fmt::Debug for SymmetricMemoryScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricMemoryScope")
            .field("state", &self.state())
            .field("capturing", &self.is_capturing())
            .field("pause_api", &self.pause_api())
            .finish()
    }
}

struct Active<'a> {
    armed: Armed<'a>,
    comm: &'a dyn PointToPointComm,
    routing: Option<RoutingGuard>,
    capture_pool: Option<GraphPoolId>,
    span: Span,
}

/// An entered scope.
///
/// Closing, explicitly with [`close`](Self::close) or by dropping, stops the
/// routing and runs the registration pass. Errors seen while dropping are
/// logged; call `close` to observe them.
///
/// Not `Send`: routing is per thread.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard<'a> {
    owner: &'a SymmetricMemory,
    active: Option<Active<'a>>,
    state: ScopeState,
}

impl ScopeGuard<'_> {
    /// Current state.
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// The shared pool, while active.
    pub fn pool(&self) -> Option<&Arc<MemoryPool>> {
        self.active.as_ref().map(|a| a.armed.context.pool())
    }

    /// Tag `storage` as symmetric. No-op while disabled.
    pub fn tag(&self, storage: impl SymmetricStorage) {
        if self.state != ScopeState::Disabled {
            self.owner.tracker().tag(storage);
        }
    }

    /// Close the scope and run the registration pass.
    ///
    /// Idempotent: later calls, and calls on a disabled scope, return an
    /// empty report. Capture routing is resumed even when a registration
    /// fails; the first registration error is returned afterwards.
    pub fn close(&mut self) -> Result<ExitReport> {
        let Some(active) = self.active.take() else {
            return Ok(ExitReport::default());
        };
        self.state = ScopeState::Closed;
        close_active(self.owner, active)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "symmetric memory scope exit failed");
        }
    }
}

impl fmt::Debug for ScopeGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("state", &self.state)
            .field("pool", &self.pool().map(|p| p.id()))
            .finish()
    }
}

fn close_active(owner: &SymmetricMemory, mut active: Active<'_>) -> Result<ExitReport> {
    let _entered = active.span.enter();
    let armed = &active.armed;
    let group = armed.group.group_name();

    // Stop routing before looking at the pool.
    drop(active.routing.take());

    let skip_default_stream = armed.pause_api.has_snapshot_defect() && !armed.disable_war;
    let pool = armed.context.pool();
    let mut report = ExitReport::default();
    let mut first_error = None;

    let tracker = owner.tracker();
    let claimed: Vec<SegmentInfo> = tracker.with_base_addrs(|bases| {
        let mut claimed = Vec::new();
        for segment in pool.snapshot() {
            if bases.is_known(segment.address) {
                report.already_registered += 1;
                continue;
            }
            if skip_default_stream && segment.on_default_stream() {
                tracing::debug!(
                    group = group,
                    address = format_args!("{:#x}", segment.address),
                    size = segment.total_size,
                    "skipping default-stream segment"
                );
                observability::record_segment_skipped(group);
                report.skipped += 1;
                continue;
            }
            if bases.claim(segment.address) {
                claimed.push(segment);
            }
        }
        claimed
    });

    // The tracker lock is released here; the communicator may query it.
    for segment in claimed {
        let result = register(active.comm, &segment);
        tracker.settle(segment.address, result.is_ok());
        match result {
            Ok(()) => {
                observability::record_segment_registered(group, segment.total_size);
                report.registered += 1;
                report.registered_bytes += segment.total_size;
            }
            Err(e) => {
                tracing::warn!(
                    group = group,
                    address = format_args!("{:#x}", segment.address),
                    size = segment.total_size,
                    error = %e,
                    "segment registration failed"
                );
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(id) = active.capture_pool {
        resume_capture(armed.runtime, armed.pause_api, armed.device, id);
    }

    tracing::debug!(
        group = group,
        registered = report.registered,
        registered_bytes = report.registered_bytes,
        skipped = report.skipped,
        already_registered = report.already_registered,
        "symmetric memory scope closed"
    );

    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

fn register(comm: &dyn PointToPointComm, segment: &SegmentInfo) -> Result<()> {
    comm.register_comm_window_raw(segment.address, segment.total_size)?;
    tracing::debug!(
        address = format_args!("{:#x}", segment.address),
        size = segment.total_size,
        stream = %segment.stream,
        "registered symmetric window"
    );
    Ok(())
}

fn pause_capture(runtime: &dyn DeviceRuntime, api: PoolPauseApi, device: DeviceId, id: GraphPoolId) {
    match api {
        PoolPauseApi::PreThreshold => {
            runtime.end_allocate_current_stream_to_pool(device, id);
            observability::trace_capture_paused(device, id, "end_allocate_current_stream_to_pool");
        }
        PoolPauseApi::PostThreshold => {
            runtime.end_allocate_to_pool(device, id);
            observability::trace_capture_paused(device, id, "end_allocate_to_pool");
        }
    }
}

fn resume_capture(runtime: &dyn DeviceRuntime, api: PoolPauseApi, device: DeviceId, id: GraphPoolId) {
    match api {
        PoolPauseApi::PreThreshold => {
            runtime.begin_allocate_to_pool(device, id);
            observability::trace_capture_resumed(device, id, "begin_allocate_to_pool");
        }
        PoolPauseApi::PostThreshold => {
            runtime.begin_allocate_current_thread_to_pool(device, id);
            observability::trace_capture_resumed(device, id, "begin_allocate_current_thread_to_pool");
        }
    }
}
