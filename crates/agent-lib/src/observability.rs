//! Observability infrastructure for the hostwatch agent
//!
//! Provides:
//! - Prometheus metrics (tick latency, append/eviction counters, source errors)
//! - Structured JSON logging with tracing

use prometheus::{register_histogram, register_int_gauge, Histogram, IntGauge};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<HostwatchMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct HostwatchMetricsInner {
    tick_latency_seconds: Histogram,
    analysis_latency_seconds: Histogram,
    samples_appended: IntGauge,
    samples_evicted: IntGauge,
    log_events_buffered: IntGauge,
    source_errors: IntGauge,
    anomalies_detected: IntGauge,
    ticks_completed: IntGauge,
}

impl HostwatchMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "hostwatch_tick_latency_seconds",
                "Time spent collecting all sources in one sampling tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            analysis_latency_seconds: register_histogram!(
                "hostwatch_analysis_latency_seconds",
                "Time spent running one anomaly/correlation analysis pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register analysis_latency_seconds"),

            samples_appended: register_int_gauge!(
                "hostwatch_samples_appended_total",
                "Total number of samples appended to the store"
            )
            .expect("Failed to register samples_appended"),

            samples_evicted: register_int_gauge!(
                "hostwatch_samples_evicted_total",
                "Total number of samples evicted from ring buffers"
            )
            .expect("Failed to register samples_evicted"),

            log_events_buffered: register_int_gauge!(
                "hostwatch_log_events_total",
                "Total number of log events appended to the store"
            )
            .expect("Failed to register log_events_buffered"),

            source_errors: register_int_gauge!(
                "hostwatch_source_errors_total",
                "Total number of degraded source collections"
            )
            .expect("Failed to register source_errors"),

            anomalies_detected: register_int_gauge!(
                "hostwatch_anomalies_detected_total",
                "Total number of anomalies detected"
            )
            .expect("Failed to register anomalies_detected"),

            ticks_completed: register_int_gauge!(
                "hostwatch_ticks_completed_total",
                "Total number of completed sampling ticks"
            )
            .expect("Failed to register ticks_completed"),
        }
    }
}

/// Hostwatch metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct HostwatchMetrics {
    // This is just a marker - we use the global instance
    _private: (),
}

impl Default for HostwatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HostwatchMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HostwatchMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HostwatchMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the duration of one sampling tick
    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    /// Record the duration of one analysis pass
    pub fn observe_analysis_latency(&self, duration_secs: f64) {
        self.inner().analysis_latency_seconds.observe(duration_secs);
    }

    /// Increment appended-sample counter
    pub fn inc_samples_appended(&self) {
        self.inner().samples_appended.inc();
    }

    /// Add to the evicted-sample counter
    pub fn inc_samples_evicted(&self, count: u64) {
        self.inner().samples_evicted.add(count as i64);
    }

    /// Add to the buffered-log-event counter
    pub fn inc_log_events(&self, count: u64) {
        self.inner().log_events_buffered.add(count as i64);
    }

    /// Increment the degraded-source counter
    pub fn inc_source_errors(&self) {
        self.inner().source_errors.inc();
    }

    /// Increment the detected-anomaly counter
    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    /// Increment the completed-tick counter
    pub fn inc_ticks_completed(&self) {
        self.inner().ticks_completed.inc();
    }
}

/// Structured logger for significant agent events
///
/// Provides consistent JSON-formatted logging for anomalies, degraded
/// sources, and lifecycle transitions.
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    /// Log a detected anomaly
    pub fn log_anomaly(
        &self,
        key: &str,
        severity: &str,
        observed_value: f64,
        baseline_mean: f64,
        score: f64,
    ) {
        match severity {
            "critical" => {
                warn!(
                    event = "anomaly_detected",
                    host = %self.host_name,
                    key = %key,
                    severity = %severity,
                    observed_value = observed_value,
                    baseline_mean = baseline_mean,
                    score = score,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    host = %self.host_name,
                    key = %key,
                    severity = %severity,
                    observed_value = observed_value,
                    baseline_mean = baseline_mean,
                    score = score,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log a source that failed or timed out for one tick
    pub fn log_source_degraded(&self, source: &str, reason: &str) {
        warn!(
            event = "source_degraded",
            host = %self.host_name,
            source = %source,
            reason = %reason,
            "Source collection degraded for this tick"
        );
    }

    /// Log a completed analysis pass
    pub fn log_report(&self, findings: usize, health_score: u8, omitted_keys: usize) {
        info!(
            event = "report_generated",
            host = %self.host_name,
            findings = findings,
            health_score = health_score,
            omitted_keys = omitted_keys,
            "Analysis report generated"
        );
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, sample_interval_secs: u64) {
        info!(
            event = "agent_started",
            host = %self.host_name,
            agent_version = %version,
            sample_interval_secs = sample_interval_secs,
            "Hostwatch agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            host = %self.host_name,
            reason = %reason,
            "Hostwatch agent shutting down"
        );
    }
}
