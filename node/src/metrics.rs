//! Prometheus metrics for the coprocessor.
//!
//! [`CoprocMetrics`] owns a dedicated [`Registry`] so a host can encode it
//! into the Prometheus text exposition format next to its own metrics.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

pub struct CoprocMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Computations accepted into a session (after dedup).
    pub computations_inserted: IntCounter,
    /// Computations added to the cache's pending queues.
    pub computations_enqueued: IntCounter,
    /// Executor round trips that completed successfully.
    pub flushes: IntCounter,
    /// Executor round trips that failed and left work pending.
    pub flush_failures: IntCounter,
    /// Result ciphertexts stored into the materialized arena.
    pub results_materialized: IntCounter,
    /// Materialized blocks dropped by GC.
    pub gc_evicted_blocks: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    pub pending_computations: IntGauge,
    pub materialized_blocks: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Executor round-trip time, in milliseconds.
    pub flush_latency_ms: Histogram,
}

impl CoprocMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        // Counters
        let computations_inserted = register_int_counter_with_registry!(
            Opts::new(
                "veil_computations_inserted_total",
                "Computations accepted into sessions"
            ),
            registry
        )
        .expect("failed to register computations_inserted counter");

        let computations_enqueued = register_int_counter_with_registry!(
            Opts::new(
                "veil_computations_enqueued_total",
                "Computations added to the ciphertext cache"
            ),
            registry
        )
        .expect("failed to register computations_enqueued counter");

        let flushes = register_int_counter_with_registry!(
            Opts::new("veil_flushes_total", "Successful executor round trips"),
            registry
        )
        .expect("failed to register flushes counter");

        let flush_failures = register_int_counter_with_registry!(
            Opts::new("veil_flush_failures_total", "Failed executor round trips"),
            registry
        )
        .expect("failed to register flush_failures counter");

        let results_materialized = register_int_counter_with_registry!(
            Opts::new(
                "veil_results_materialized_total",
                "Result ciphertexts stored in the cache"
            ),
            registry
        )
        .expect("failed to register results_materialized counter");

        let gc_evicted_blocks = register_int_counter_with_registry!(
            Opts::new(
                "veil_gc_evicted_blocks_total",
                "Materialized blocks evicted by cache GC"
            ),
            registry
        )
        .expect("failed to register gc_evicted_blocks counter");

        // Gauges
        let pending_computations = register_int_gauge_with_registry!(
            Opts::new(
                "veil_pending_computations",
                "Computations waiting for the executor"
            ),
            registry
        )
        .expect("failed to register pending_computations gauge");

        let materialized_blocks = register_int_gauge_with_registry!(
            Opts::new(
                "veil_materialized_blocks",
                "Blocks with results held in the cache"
            ),
            registry
        )
        .expect("failed to register materialized_blocks gauge");

        // Histogram – exponential buckets covering 1 ms → ~16 s.
        let flush_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "veil_flush_latency_ms",
                "Executor round-trip time in milliseconds"
            )
            .buckets(
                prometheus::exponential_buckets(1.0, 2.0, 15)
                    .expect("static bucket parameters are valid")
            ),
            registry
        )
        .expect("failed to register flush_latency_ms histogram");

        Self {
            registry,
            computations_inserted,
            computations_enqueued,
            flushes,
            flush_failures,
            results_materialized,
            gc_evicted_blocks,
            pending_computations,
            materialized_blocks,
            flush_latency_ms,
        }
    }
}

impl Default for CoprocMetrics {
    fn default() -> Self {
        Self::new()
    }
}
