// src/core/metrics.rs

//! Defines and registers Prometheus metrics for control-plane monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Worker fleet gauges ---
    /// Number of workers currently registered, labeled by enabled/read-only state.
    pub static ref WORKERS_TOTAL: GaugeVec =
        register_gauge_vec!("replicad_workers_total", "Number of configured workers.", &["is_enabled", "is_read_only"]).unwrap();
    /// Per-worker consecutive non-response seconds, labeled by service.
    pub static ref WORKER_SILENT_SECONDS: GaugeVec =
        register_gauge_vec!("replicad_worker_silent_seconds", "Consecutive seconds a worker's service has not responded.", &["worker", "service"]).unwrap();

    // --- Chunk locker gauges ---
    /// Chunk locks currently held.
    pub static ref CHUNK_LOCKS_HELD: Gauge =
        register_gauge!("replicad_chunk_locks_held", "Number of (family, chunk) locks currently held.").unwrap();
    /// Lock acquisition attempts that found the key already held.
    pub static ref CHUNK_LOCK_CONTENTION_TOTAL: Counter =
        register_counter!("replicad_chunk_lock_contention_total", "Total lock() calls that failed because the chunk was already locked.").unwrap();

    // --- Job layer counters ---
    /// Jobs launched, labeled by kind.
    pub static ref JOBS_LAUNCHED_TOTAL: CounterVec =
        register_counter_vec!("replicad_jobs_launched_total", "Total jobs launched, labeled by kind.", &["kind"]).unwrap();
    /// Jobs finished, labeled by kind and extended state.
    pub static ref JOBS_FINISHED_TOTAL: CounterVec =
        register_counter_vec!("replicad_jobs_finished_total", "Total jobs finished, labeled by kind and extended state.", &["kind", "ext_state"]).unwrap();

    // --- Replica health gauges ---
    /// Good (complete + collocated) replicas per family.
    pub static ref GOOD_REPLICAS: GaugeVec =
        register_gauge_vec!("replicad_good_replicas", "Number of good replicas, labeled by family and chunk.", &["family"]).unwrap();
    /// Worker evictions performed by the health monitor.
    pub static ref WORKER_EVICTIONS_TOTAL: Counter =
        register_counter!("replicad_worker_evictions_total", "Total workers evicted by the health monitor.").unwrap();

    // --- Request layer histogram ---
    /// A histogram of worker request round-trip latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("replicad_request_latency_seconds", "Latency of worker requests in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
