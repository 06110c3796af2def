//! Metrics collection using metrics-rs.

use metrics::{Counter, Histogram, Unit, counter, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const INVOCATIONS: &str = "matbind_invocations";
const INVOCATION_FAILURES: &str = "matbind_invocation_failures";
const INVOCATION_TIME_NS: &str = "matbind_invocation_time_ns";
const CATALOG_OPERATIONS: &str = "matbind_catalog_operations";
const CATALOG_TYPES: &str = "matbind_catalog_types";
const CATALOG_COLLISIONS: &str = "matbind_catalog_collisions";
const ENUMERATION_SKIPPED: &str = "matbind_enumeration_skipped";
const STORE_ENTRIES: &str = "matbind_store_entries";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        INVOCATIONS,
        Unit::Count,
        "Invocations that reached the published state"
    );
    metrics::describe_counter!(
        INVOCATION_FAILURES,
        Unit::Count,
        "Invocations that ended in the failed state"
    );
    metrics::describe_histogram!(
        INVOCATION_TIME_NS,
        Unit::Nanoseconds,
        "Wall time of one invocation, conversion included"
    );
    metrics::describe_gauge!(
        CATALOG_OPERATIONS,
        Unit::Count,
        "Operations in the current catalog generation"
    );
    metrics::describe_gauge!(
        CATALOG_TYPES,
        Unit::Count,
        "Constructible types in the current catalog generation"
    );
    metrics::describe_counter!(
        CATALOG_COLLISIONS,
        Unit::Count,
        "Catalog keys overwritten by a later entry"
    );
    metrics::describe_counter!(
        ENUMERATION_SKIPPED,
        Unit::Count,
        "Archive entries skipped during enumeration"
    );
    metrics::describe_gauge!(STORE_ENTRIES, Unit::Count, "Values held by the result store");
}

/// Record the size of a freshly swapped catalog.
#[inline]
pub fn record_catalog_size(operations: usize, types: usize) {
    gauge!(CATALOG_OPERATIONS).set(operations as f64);
    gauge!(CATALOG_TYPES).set(types as f64);
}

/// Record catalog key collisions.
#[inline]
pub fn record_collisions(count: usize) {
    counter!(CATALOG_COLLISIONS).increment(count as u64);
}

/// Record skipped archive entries.
#[inline]
pub fn record_enumeration_skipped(archive: &str, count: usize) {
    counter!(ENUMERATION_SKIPPED, "archive" => archive.to_string()).increment(count as u64);
}

/// Record the number of values in the result store.
#[inline]
pub fn record_store_size(entries: usize) {
    gauge!(STORE_ENTRIES).set(entries as f64);
}

/// Metrics for a single operation signature.
#[derive(Clone)]
pub struct InvocationMetrics {
    signature: String,
    completed: Counter,
    failed: Counter,
    out_of_memory: Counter,
    time: Histogram,
}

impl InvocationMetrics {
    /// Create a collector labelled with `signature`.
    pub fn new(signature: &str) -> Self {
        Self {
            signature: signature.to_string(),
            completed: counter!(INVOCATIONS, "signature" => signature.to_string()),
            failed: counter!(
                INVOCATION_FAILURES,
                "signature" => signature.to_string(),
                "kind" => "error"
            ),
            out_of_memory: counter!(
                INVOCATION_FAILURES,
                "signature" => signature.to_string(),
                "kind" => "out_of_memory"
            ),
            time: histogram!(INVOCATION_TIME_NS, "signature" => signature.to_string()),
        }
    }

    /// Record a completed invocation.
    #[inline]
    pub fn record_completed(&self) {
        self.completed.increment(1);
    }

    /// Record a failed invocation.
    #[inline]
    pub fn record_failed(&self, out_of_memory: bool) {
        if out_of_memory {
            self.out_of_memory.increment(1);
        } else {
            self.failed.increment(1);
        }
    }

    /// Record invocation time.
    #[inline]
    pub fn record_time(&self, duration: Duration) {
        self.time.record(duration.as_nanos() as f64);
    }

    /// Start a timer and return a guard that records on drop.
    pub fn start_timer(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            metrics: self,
        }
    }

    /// Signature label.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Guard that records invocation time when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    metrics: &'a InvocationMetrics,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.metrics.record_time(self.start.elapsed());
    }
}
