//! Core data models for the hostwatch agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One timestamped numeric observation of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric key identifying the time series (e.g. "cpu.total", "proc.1234.cpu")
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(key: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            key: key.into(),
            timestamp,
            value,
        }
    }
}

/// Scheduling state of a process at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskSleep,
    Stopped,
    Zombie,
    Other,
}

/// Per-process resource usage captured on one sampling tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub mem_bytes: u64,
    pub state: ProcessState,
    pub user: String,
}

/// Severity of a log event, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

impl LogSeverity {
    /// Map a syslog priority (journald PRIORITY field) to a severity tier.
    /// 0-2 (emerg/alert/crit) -> Critical, 3 (err) -> Error, 4 (warning) -> Warn,
    /// everything else -> Info.
    pub fn from_syslog_priority(priority: u8) -> Self {
        match priority {
            0..=2 => LogSeverity::Critical,
            3 => LogSeverity::Error,
            4 => LogSeverity::Warn,
            _ => LogSeverity::Info,
        }
    }
}

/// A discrete log event from the host journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    /// Originating unit or identifier (e.g. "sshd.service")
    pub source: String,
    pub message: String,
}

/// Severity of a detected anomaly, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

/// A statistically significant deviation detected in one metric's history.
///
/// Consecutive deviating points in the same direction are merged, so the
/// window spans the whole run rather than a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Value of the most-deviating sample in the run
    pub observed_value: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    /// Deviation score (|value - mean| / std_dev, clamped to the score ceiling)
    pub score: f64,
    pub severity: AnomalySeverity,
}

/// An anomaly paired with temporally correlated log evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub anomaly: AnomalyRecord,
    /// Events within the correlation window, in timestamp order (value copies)
    pub correlated_events: Vec<LogEvent>,
    /// Confidence in 0.0..1.0, deterministic for identical inputs
    pub confidence: f64,
}

/// Summary statistics for one metric key over the analyzed range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub latest: f64,
}

/// The self-describing output of one analysis pass.
///
/// Holds everything by value: the store may evict the underlying history
/// after the report is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    /// Overall health in 0..=100
    pub health_score: u8,
    /// Findings sorted by descending confidence
    pub findings: Vec<Finding>,
    pub summaries: BTreeMap<String, MetricSummary>,
    /// Keys whose queries failed and were left out of this report
    pub omitted_keys: Vec<String>,
    pub sample_count: usize,
    pub log_event_count: usize,
}

/// Collection state of one registered source, as of its last tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state")]
pub enum SourceState {
    Ok,
    Degraded { error: String },
}

/// Degraded/stale indicator surfaced by the live snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    pub last_tick: DateTime<Utc>,
    #[serde(flatten)]
    pub state: SourceState,
}

impl SourceStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self.state, SourceState::Degraded { .. })
    }
}

/// Constant-time live view for display consumers: the latest process table,
/// the latest scalar value per metric, and per-source collection status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub processes: Vec<ProcessSnapshot>,
    pub scalars: BTreeMap<String, f64>,
    pub sources: Vec<SourceStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syslog_priority_mapping() {
        assert_eq!(LogSeverity::from_syslog_priority(0), LogSeverity::Critical);
        assert_eq!(LogSeverity::from_syslog_priority(2), LogSeverity::Critical);
        assert_eq!(LogSeverity::from_syslog_priority(3), LogSeverity::Error);
        assert_eq!(LogSeverity::from_syslog_priority(4), LogSeverity::Warn);
        assert_eq!(LogSeverity::from_syslog_priority(6), LogSeverity::Info);
        assert_eq!(LogSeverity::from_syslog_priority(7), LogSeverity::Info);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(LogSeverity::Critical > LogSeverity::Error);
        assert!(LogSeverity::Error > LogSeverity::Warn);
        assert!(LogSeverity::Warn > LogSeverity::Info);
        assert!(AnomalySeverity::Critical > AnomalySeverity::Warning);
    }

    #[test]
    fn test_source_status_degraded() {
        let ok = SourceStatus {
            source: "proc".to_string(),
            last_tick: Utc::now(),
            state: SourceState::Ok,
        };
        assert!(!ok.is_degraded());

        let degraded = SourceStatus {
            source: "journal".to_string(),
            last_tick: Utc::now(),
            state: SourceState::Degraded {
                error: "timed out".to_string(),
            },
        };
        assert!(degraded.is_degraded());
    }

    #[test]
    fn test_report_round_trips_through_json() {
        let report = AnalysisReport {
            generated_at: Utc::now(),
            range_start: Utc::now(),
            range_end: Utc::now(),
            health_score: 85,
            findings: vec![],
            summaries: BTreeMap::new(),
            omitted_keys: vec!["proc.42.cpu".to_string()],
            sample_count: 120,
            log_event_count: 7,
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.health_score, 85);
        assert_eq!(back.omitted_keys, vec!["proc.42.cpu".to_string()]);
    }
}
