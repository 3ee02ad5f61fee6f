//! Full analysis pass: detection, correlation, summary statistics and
//! health scoring over a store range, assembled into a self-describing
//! report.

use super::{AnomalyDetector, Correlator, CorrelatorConfig, DetectorConfig};
use crate::config::MonitorConfig;
use crate::models::{AnalysisReport, AnomalyRecord, MetricSummary, Sample};
use crate::observability::HostwatchMetrics;
use crate::store::TimeSeriesStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Usage level above which the health score takes a sustained-load penalty
const LOAD_PENALTY_THRESHOLD: f64 = 80.0;

/// Runs complete analysis passes over a store range.
///
/// A pass runs to completion once started; the shared cancellation flag is
/// only consulted before a new pass begins.
pub struct Analyzer {
    detector: AnomalyDetector,
    correlator: Correlator,
    cancelled: Arc<AtomicBool>,
    metrics: HostwatchMetrics,
}

impl Analyzer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            detector: AnomalyDetector::new(DetectorConfig {
                k: config.anomaly_k,
                baseline_window: config.baseline_window,
                min_baseline: config.min_baseline_samples,
            }),
            correlator: Correlator::new(CorrelatorConfig {
                window: config.correlation_window,
            }),
            cancelled: Arc::new(AtomicBool::new(false)),
            metrics: HostwatchMetrics::new(),
        }
    }

    /// Share a cancellation flag with the pipeline's shutdown path
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Analyze `[from, to]` across every key in the store.
    ///
    /// Returns None when cancellation was requested before the pass
    /// started. A key whose retained samples cannot be summarized (non-
    /// finite values) is omitted from the report and listed in
    /// `omitted_keys` rather than failing the whole pass.
    pub fn analyze(
        &self,
        store: &TimeSeriesStore,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<AnalysisReport> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let started = Instant::now();

        let mut keys = store.keys();
        keys.sort();

        let mut summaries = BTreeMap::new();
        let mut omitted_keys = Vec::new();
        let mut anomalies: Vec<AnomalyRecord> = Vec::new();
        let mut sample_count = 0;

        for key in keys {
            let samples = store.range_query(&key, from, to);
            if samples.is_empty() {
                continue;
            }
            let Some(summary) = summarize(&samples) else {
                warn!(key = %key, "omitting key with non-finite samples from report");
                omitted_keys.push(key);
                continue;
            };
            sample_count += samples.len();
            summaries.insert(key.clone(), summary);
            anomalies.extend(self.detector.detect(&key, &samples));
        }

        for _ in &anomalies {
            self.metrics.inc_anomalies_detected();
        }

        // Events are pulled wide enough to cover the correlation window
        // on both sides of the range
        let window = chrono::Duration::from_std(self.correlator.window())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let events = store.logs_in_range(from - window, to + window);
        let log_event_count = store.logs_in_range(from, to).len();

        let findings = self.correlator.correlate(anomalies, &events);
        let health_score = health_score(&findings, &summaries);

        self.metrics
            .observe_analysis_latency(started.elapsed().as_secs_f64());

        Some(AnalysisReport {
            generated_at: Utc::now(),
            range_start: from,
            range_end: to,
            health_score,
            findings,
            summaries,
            omitted_keys,
            sample_count,
            log_event_count,
        })
    }

}

/// Summary statistics over an ordered, non-empty sample slice.
/// Returns None when any value is non-finite.
fn summarize(samples: &[Sample]) -> Option<MetricSummary> {
    if samples.iter().any(|s| !s.value.is_finite()) {
        return None;
    }

    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s.value).sum::<f64>() / n;
    let mut min = f64::MAX;
    let mut max = f64::MIN;
    for s in samples {
        min = min.min(s.value);
        max = max.max(s.value);
    }
    let std_dev = if samples.len() > 1 {
        let variance = samples
            .iter()
            .map(|s| (s.value - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    Some(MetricSummary {
        count: samples.len(),
        mean,
        min,
        max,
        std_dev,
        latest: samples.last()?.value,
    })
}

/// Health in 0..=100: finding severities subtract first, then sustained
/// high average CPU or memory usage.
fn health_score(
    findings: &[crate::models::Finding],
    summaries: &BTreeMap<String, MetricSummary>,
) -> u8 {
    let mut score: i32 = 100;

    for finding in findings {
        score -= match finding.anomaly.severity {
            crate::models::AnomalySeverity::Critical => 15,
            crate::models::AnomalySeverity::Warning => 5,
        };
    }
    if summaries
        .get("cpu.total")
        .is_some_and(|s| s.mean > LOAD_PENALTY_THRESHOLD)
    {
        score -= 10;
    }
    if summaries
        .get("mem.percent")
        .is_some_and(|s| s.mean > LOAD_PENALTY_THRESHOLD)
    {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}
