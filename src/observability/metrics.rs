//! Metrics collection using metrics-rs.

use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const SEGMENTS_REGISTERED: &str = "symm_mem_segments_registered";
const SEGMENTS_SKIPPED: &str = "symm_mem_segments_skipped";
const REGISTERED_BYTES: &str = "symm_mem_registered_bytes";
const SCOPES_ENTERED: &str = "symm_mem_scopes_entered";
const POOL_SEGMENTS: &str = "symm_mem_pool_segments";
const POOL_RESERVED_BYTES: &str = "symm_mem_pool_reserved_bytes";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        SEGMENTS_REGISTERED,
        Unit::Count,
        "Pool segments registered as communication windows"
    );
    metrics::describe_counter!(
        SEGMENTS_SKIPPED,
        Unit::Count,
        "Default-stream segments left unregistered on affected runtimes"
    );
    metrics::describe_counter!(
        REGISTERED_BYTES,
        Unit::Bytes,
        "Bytes registered as communication windows"
    );
    metrics::describe_counter!(SCOPES_ENTERED, Unit::Count, "Symmetric memory scopes entered");
    metrics::describe_gauge!(POOL_SEGMENTS, Unit::Count, "Segments held by the shared pool");
    metrics::describe_gauge!(
        POOL_RESERVED_BYTES,
        Unit::Bytes,
        "Bytes reserved from the backing allocator"
    );
}

/// Record a segment registered with a group's communicator.
#[inline]
pub fn record_segment_registered(group: &str, bytes: usize) {
    counter!(SEGMENTS_REGISTERED, "group" => group.to_string()).increment(1);
    counter!(REGISTERED_BYTES, "group" => group.to_string()).increment(bytes as u64);
}

/// Record a segment skipped by the default-stream rule.
#[inline]
pub fn record_segment_skipped(group: &str) {
    counter!(SEGMENTS_SKIPPED, "group" => group.to_string()).increment(1);
}

/// Record a scope becoming active.
#[inline]
pub fn record_scope_entered(group: &str) {
    counter!(SCOPES_ENTERED, "group" => group.to_string()).increment(1);
}

/// Record the shared pool's footprint.
#[inline]
pub fn record_pool_usage(segments: usize, reserved_bytes: usize) {
    gauge!(POOL_SEGMENTS).set(segments as f64);
    gauge!(POOL_RESERVED_BYTES).set(reserved_bytes as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // Should be idempotent
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        record_segment_registered("tp", 2 << 20);
        record_segment_skipped("tp");
        record_scope_entered("tp");
        record_pool_usage(3, 6 << 20);
    }
}
