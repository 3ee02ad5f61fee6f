//! Agent configuration
//!
//! Loaded from HOSTWATCH_-prefixed environment variables; converts into
//! the validated core configuration before the pipeline starts.

use anyhow::Result;
use hostwatch_lib::MonitorConfig;
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Host name used in structured log events
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// API server port for health/metrics/snapshot endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// History retained per metric key, in seconds
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Processes tracked as per-process series each tick
    #[serde(default = "default_top_process_count")]
    pub top_process_count: usize,

    /// Standard-deviation multiplier for anomaly detection
    #[serde(default = "default_anomaly_k")]
    pub anomaly_k: f64,

    /// Trailing baseline length, in samples
    #[serde(default = "default_baseline_window")]
    pub baseline_window: usize,

    /// Cold-start guard for the detector
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,

    /// Symmetric anomaly/log correlation window, in seconds
    #[serde(default = "default_correlation_window")]
    pub correlation_window_secs: u64,

    /// Whether to register the journald tailer
    #[serde(default = "default_log_source_enabled")]
    pub log_source_enabled: bool,

    /// Upper bound on buffered log events
    #[serde(default = "default_max_log_events")]
    pub max_log_events: usize,

    /// Where to write the final analysis report as JSON (skipped if unset)
    #[serde(default)]
    pub report_path: Option<String>,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_sample_interval() -> u64 {
    2
}

fn default_retention() -> u64 {
    3600
}

fn default_top_process_count() -> usize {
    20
}

fn default_anomaly_k() -> f64 {
    3.0
}

fn default_baseline_window() -> usize {
    20
}

fn default_min_baseline_samples() -> usize {
    5
}

fn default_correlation_window() -> u64 {
    30
}

fn default_log_source_enabled() -> bool {
    true
}

fn default_max_log_events() -> usize {
    5000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            api_port: default_api_port(),
            sample_interval_secs: default_sample_interval(),
            retention_secs: default_retention(),
            top_process_count: default_top_process_count(),
            anomaly_k: default_anomaly_k(),
            baseline_window: default_baseline_window(),
            min_baseline_samples: default_min_baseline_samples(),
            correlation_window_secs: default_correlation_window(),
            log_source_enabled: default_log_source_enabled(),
            max_log_events: default_max_log_events(),
            report_path: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("HOSTWATCH"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    /// Build the validated core configuration. Fails fast on any invalid
    /// field, before sampling starts.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let monitor = MonitorConfig {
            sample_interval: Duration::from_secs(self.sample_interval_secs),
            retention: Duration::from_secs(self.retention_secs),
            top_process_count: self.top_process_count,
            anomaly_k: self.anomaly_k,
            baseline_window: self.baseline_window,
            min_baseline_samples: self.min_baseline_samples,
            correlation_window: Duration::from_secs(self.correlation_window_secs),
            log_source_enabled: self.log_source_enabled,
            max_log_events: self.max_log_events,
        };
        monitor.validate()?;
        Ok(monitor)
    }
}
