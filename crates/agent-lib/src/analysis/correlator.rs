//! Correlation of anomalies with temporally nearby log events
//!
//! For each anomaly, selects log events inside a symmetric window around
//! the anomaly's time range and derives a deterministic confidence from
//! anomaly severity, event severity and temporal proximity.

use crate::models::{AnomalyRecord, AnomalySeverity, Finding, LogEvent, LogSeverity};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Tuning for anomaly/log correlation
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Symmetric window applied on both sides of the anomaly range
    pub window: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
        }
    }
}

/// Associates anomaly records with log evidence, producing ranked findings
pub struct Correlator {
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self { config }
    }

    /// The configured symmetric correlation window
    pub fn window(&self) -> Duration {
        self.config.window
    }

    /// Build one finding per anomaly. `events` must be ordered by
    /// timestamp. Findings come back sorted by descending confidence,
    /// ties broken by descending severity, then earliest window start.
    pub fn correlate(&self, anomalies: Vec<AnomalyRecord>, events: &[LogEvent]) -> Vec<Finding> {
        let mut findings: Vec<Finding> = anomalies
            .into_iter()
            .map(|anomaly| self.build_finding(anomaly, events))
            .collect();

        findings.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.anomaly.severity.cmp(&a.anomaly.severity))
                .then_with(|| a.anomaly.window_start.cmp(&b.anomaly.window_start))
                .then_with(|| a.anomaly.key.cmp(&b.anomaly.key))
        });
        findings
    }

    fn build_finding(&self, anomaly: AnomalyRecord, events: &[LogEvent]) -> Finding {
        let window = chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let from = anomaly.window_start - window;
        let to = anomaly.window_end + window;

        // Events are time-ordered: binary-search the window edges
        let start = events.partition_point(|e| e.timestamp < from);
        let end = events.partition_point(|e| e.timestamp <= to);
        let correlated: Vec<LogEvent> = events[start..end].to_vec();

        let confidence = self.confidence(&anomaly, &correlated);
        Finding {
            anomaly,
            correlated_events: correlated,
            confidence,
        }
    }

    /// Deterministic confidence in [base, 1): the severity-only base plus
    /// a saturating contribution from matched events. Adding an in-window
    /// event can never lower the result.
    fn confidence(&self, anomaly: &AnomalyRecord, events: &[LogEvent]) -> f64 {
        let base = severity_base(anomaly.severity);
        if events.is_empty() {
            return base;
        }

        let window_secs = self.config.window.as_secs_f64().max(1.0);
        let weight: f64 = events
            .iter()
            .map(|e| {
                let distance = distance_secs(e.timestamp, anomaly.window_start, anomaly.window_end);
                event_weight(e.severity) / (1.0 + distance / window_secs)
            })
            .sum();

        base + (1.0 - base) * (weight / (weight + 1.0))
    }
}

/// Severity-only confidence floor for a finding with no log evidence
fn severity_base(severity: AnomalySeverity) -> f64 {
    match severity {
        AnomalySeverity::Warning => 0.4,
        AnomalySeverity::Critical => 0.6,
    }
}

/// How strongly one event of this severity pulls confidence upward
fn event_weight(severity: LogSeverity) -> f64 {
    match severity {
        LogSeverity::Info => 0.25,
        LogSeverity::Warn => 0.5,
        LogSeverity::Error => 0.75,
        LogSeverity::Critical => 1.0,
    }
}

/// Seconds from an event to the nearest edge of the anomaly window
/// (zero inside the window)
fn distance_secs(event: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    if event < start {
        (start - event).num_milliseconds() as f64 / 1000.0
    } else if event > end {
        (event - end).num_milliseconds() as f64 / 1000.0
    } else {
        0.0
    }
}
