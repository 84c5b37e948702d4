//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! symm-mem exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `symm_mem_segments_registered` | Counter | Segments registered as communication windows |
//! | `symm_mem_segments_skipped` | Counter | Segments left unregistered by the default-stream rule |
//! | `symm_mem_registered_bytes` | Counter | Bytes registered as communication windows |
//! | `symm_mem_scopes_entered` | Counter | Scopes that became active |
//! | `symm_mem_pool_segments` | Gauge | Segments held by the shared pool |
//! | `symm_mem_pool_reserved_bytes` | Gauge | Bytes reserved by the shared pool |
//!
//! Counters carry a `group` label naming the communication group.
//!
//! ## Tracing
//!
//! Every active scope runs inside a `symm_mem_scope` span (see
//! [`span_scope`]); registration, skips and capture pause/resume are logged
//! as events within it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use symm_mem::observability::init_metrics;
//!
//! // Describe metrics once at startup, then install any metrics exporter.
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{
    init_metrics, record_pool_usage, record_scope_entered, record_segment_registered,
    record_segment_skipped,
};
pub use tracing_support::{span_scope, trace_capture_paused, trace_capture_resumed};
