//! Prometheus metrics for the custody engine.
//!
//! The [`EngineMetrics`] struct owns a dedicated [`Registry`] that a hosting
//! application can encode into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Central collection of all engine-level Prometheus metrics.
pub struct EngineMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Registrations that reached `FINALIZED`.
    pub registrations: IntCounter,
    /// Transfers that reached `FINALIZED`.
    pub transfers: IntCounter,
    pub recalls: IntCounter,
    /// Operations rejected or failed, before or after submission.
    pub failures: IntCounter,
    /// Operations that returned a pending result because a wait timed out.
    pub pending_outcomes: IntCounter,
    /// Projection writes deferred after a store failure.
    pub deferred_writes: IntCounter,
    pub reconcile_advanced: IntCounter,
    pub reconcile_finalized: IntCounter,
    pub reconcile_failed: IntCounter,
    pub reconcile_repaired: IntCounter,
    /// Divergences reported for operator attention.
    pub divergences: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Orchestrations currently between submission and settlement.
    pub in_flight: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time from first submission to observed finality, in milliseconds.
    pub finality_latency_ms: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    register_int_counter_with_registry!(Opts::new(name, help), registry)
        .unwrap_or_else(|e| panic!("failed to register {name}: {e}"))
}

impl EngineMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let registrations = counter(
            &registry,
            "pharmachain_registrations_total",
            "Item registrations finalized",
        );
        let transfers = counter(
            &registry,
            "pharmachain_transfers_total",
            "Custody transfers finalized",
        );
        let recalls = counter(&registry, "pharmachain_recalls_total", "Item recalls finalized");
        let failures = counter(
            &registry,
            "pharmachain_failures_total",
            "Operations rejected or failed",
        );
        let pending_outcomes = counter(
            &registry,
            "pharmachain_pending_outcomes_total",
            "Operations returned as pending after a wait timeout",
        );
        let deferred_writes = counter(
            &registry,
            "pharmachain_deferred_writes_total",
            "Projection writes deferred to reconciliation",
        );
        let reconcile_advanced = counter(
            &registry,
            "pharmachain_reconcile_advanced_total",
            "Stuck records advanced to CONFIRMED by reconciliation",
        );
        let reconcile_finalized = counter(
            &registry,
            "pharmachain_reconcile_finalized_total",
            "Stuck records finalized by reconciliation",
        );
        let reconcile_failed = counter(
            &registry,
            "pharmachain_reconcile_failed_total",
            "Stuck records marked FAILED by reconciliation",
        );
        let reconcile_repaired = counter(
            &registry,
            "pharmachain_reconcile_repaired_total",
            "Projection inconsistencies repaired by reconciliation",
        );
        let divergences = counter(
            &registry,
            "pharmachain_divergences_total",
            "Ledger/projection divergences needing operator attention",
        );

        let in_flight = register_int_gauge_with_registry!(
            Opts::new(
                "pharmachain_in_flight",
                "Orchestrations between submission and settlement"
            ),
            registry
        )
        .expect("failed to register in_flight gauge");

        // 10 ms → ~45 min, covers localhost through congested mainnet.
        let finality_latency_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "pharmachain_finality_latency_ms",
                "Submission-to-finality latency in milliseconds"
            )
            .buckets(prometheus::exponential_buckets(10.0, 2.0, 19).unwrap()),
            registry
        )
        .expect("failed to register finality_latency_ms histogram");

        Self {
            registry,
            registrations,
            transfers,
            recalls,
            failures,
            pending_outcomes,
            deferred_writes,
            reconcile_advanced,
            reconcile_finalized,
            reconcile_failed,
            reconcile_repaired,
            divergences,
            in_flight,
            finality_latency_ms,
        }
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
