//! Observability features: metrics and tracing.
//!
//! - **Metrics**: Counters, gauges, and histograms via `metrics-rs`
//! - **Tracing**: Structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `matbind_invocations` | Counter | Invocations that completed |
//! | `matbind_invocation_failures` | Counter | Failed invocations, by `kind` |
//! | `matbind_invocation_time_ns` | Histogram | Time per invocation |
//! | `matbind_catalog_operations` | Gauge | Operations in the current catalog |
//! | `matbind_catalog_types` | Gauge | Constructible types in the current catalog |
//! | `matbind_catalog_collisions` | Counter | Catalog keys overwritten |
//! | `matbind_enumeration_skipped` | Counter | Archive entries skipped |
//! | `matbind_store_entries` | Gauge | Values in the result store |
//!
//! ## Tracing
//!
//! Spans are emitted for invocations, catalog rebuilds/merges and archive
//! enumeration. Skipped entries, collisions and failed invocations are logged
//! at `warn`.

mod metrics;
mod tracing_support;

pub use metrics::{
    InvocationMetrics, TimerGuard, init_metrics, record_catalog_size, record_collisions,
    record_enumeration_skipped, record_store_size,
};
pub use tracing_support::{
    span_catalog, span_enumeration, span_invocation, trace_invocation_error, trace_state_change,
    verbose_filter,
};
