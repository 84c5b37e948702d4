//! Tracing helpers for symmetric memory scopes.

use crate::runtime::{DeviceId, GraphPoolId};
use tracing::{Level, Span, span};

/// Create a span covering one active scope.
///
/// # Example
///
/// ```rust,ignore
/// use symm_mem::observability::span_scope;
///
/// let _entered = span_scope("tp", 0, false).entered();
/// ```
#[inline]
pub fn span_scope(group: &str, device: DeviceId, capturing: bool) -> Span {
    span!(
        Level::DEBUG,
        "symm_mem_scope",
        group = %group,
        device = device,
        capturing = capturing
    )
}

/// Log capture routing being paused for a scope.
#[inline]
pub fn trace_capture_paused(device: DeviceId, pool: GraphPoolId, api: &str) {
    tracing::debug!(device = device, pool = %pool, api = api, "graph capture routing paused");
}

/// Log capture routing being resumed after a scope.
#[inline]
pub fn trace_capture_resumed(device: DeviceId, pool: GraphPoolId, api: &str) {
    tracing::debug!(device = device, pool = %pool, api = api, "graph capture routing resumed");
}
