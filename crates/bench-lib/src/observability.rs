//! Observability infrastructure for the harness
//!
//! Provides:
//! - Prometheus metrics (trial latency, cluster mutations, wait timeouts)
//! - Structured logging of run and scenario events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for attach latency (in seconds)
const TRIAL_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BenchMetricsInner> = OnceLock::new();

struct BenchMetricsInner {
    trial_seconds: HistogramVec,
    cluster_mutations: IntCounterVec,
    wait_timeouts: IntCounter,
}

impl BenchMetricsInner {
    fn new() -> Self {
        Self {
            trial_seconds: register_histogram_vec!(
                "attach_bench_trial_seconds",
                "Elapsed time of a timed attach trial",
                &["mechanism", "temperature"],
                TRIAL_BUCKETS.to_vec()
            )
            .expect("Failed to register trial_seconds"),

            cluster_mutations: register_int_counter_vec!(
                "attach_bench_cluster_mutations_total",
                "Mutating cluster API requests issued by the reconciler",
                &["operation"]
            )
            .expect("Failed to register cluster_mutations"),

            wait_timeouts: register_int_counter!(
                "attach_bench_wait_timeouts_total",
                "Bounded waits that gave up before their condition held"
            )
            .expect("Failed to register wait_timeouts"),
        }
    }
}

/// Harness metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct BenchMetrics {
    _private: (),
}

impl Default for BenchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BenchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BenchMetricsInner {
        GLOBAL_METRICS.get_or_init(BenchMetricsInner::new)
    }

    pub fn observe_trial(&self, mechanism: &str, temperature: &str, elapsed_secs: f64) {
        self.inner()
            .trial_seconds
            .with_label_values(&[mechanism, temperature])
            .observe(elapsed_secs);
    }

    pub fn inc_mutation(&self, operation: &str) {
        self.inner()
            .cluster_mutations
            .with_label_values(&[operation])
            .inc();
    }

    pub fn mutation_count(&self, operation: &str) -> u64 {
        self.inner()
            .cluster_mutations
            .with_label_values(&[operation])
            .get()
    }

    pub fn inc_wait_timeouts(&self) {
        self.inner().wait_timeouts.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for run-level events
#[derive(Clone)]
pub struct RunLogger {
    namespace: String,
}

impl RunLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_run_started(&self, version: &str, scenarios: usize) {
        info!(
            event = "run_started",
            namespace = %self.namespace,
            harness_version = %version,
            scenarios = scenarios,
            "Benchmark run started"
        );
    }

    pub fn log_scenario_finished(&self, label: &str, samples: usize, mean_secs: f64) {
        info!(
            event = "scenario_finished",
            namespace = %self.namespace,
            label = %label,
            samples = samples,
            mean_secs = mean_secs,
            "Scenario finished"
        );
    }

    pub fn log_memory_sampled(&self, label: &str, containers: usize, total_kib: u64) {
        info!(
            event = "memory_sampled",
            namespace = %self.namespace,
            label = %label,
            containers = containers,
            total_kib = total_kib,
            "Memory sampled"
        );
    }

    pub fn log_scenario_failed(&self, label: &str, error: &str) {
        warn!(
            event = "scenario_failed",
            namespace = %self.namespace,
            label = %label,
            error = %error,
            "Scenario failed, pods were torn down"
        );
    }

    /// Warm runs are expected to be at least as fast as cold runs
    pub fn log_advisory(&self, warm_label: &str, warm_mean: f64, cold_label: &str, cold_mean: f64) {
        warn!(
            event = "advisory",
            namespace = %self.namespace,
            warm_label = %warm_label,
            warm_mean_secs = warm_mean,
            cold_label = %cold_label,
            cold_mean_secs = cold_mean,
            "Warm mean exceeds cold mean"
        );
    }

    pub fn log_run_finished(&self, results_path: &str) {
        info!(
            event = "run_finished",
            namespace = %self.namespace,
            results = %results_path,
            "Benchmark run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_metrics_roundtrip() {
        let metrics = BenchMetrics::new();
        metrics.observe_trial("external_tool", "cold", 0.42);
        let before = metrics.mutation_count("test_probe");
        metrics.inc_mutation("test_probe");
        assert_eq!(metrics.mutation_count("test_probe"), before + 1);
        metrics.inc_wait_timeouts();

        let text = metrics.encode_text();
        assert!(text.contains("attach_bench_trial_seconds"));
        assert!(text.contains("attach_bench_cluster_mutations_total"));
    }

    #[test]
    fn test_run_logger_creation() {
        let logger = RunLogger::new("bench");
        assert_eq!(logger.namespace, "bench");
    }
}
