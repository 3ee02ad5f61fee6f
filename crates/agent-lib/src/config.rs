//! Validated core configuration.
//!
//! The agent binary assembles this from environment variables; library
//! consumers construct it directly. Validation happens once, before the
//! pipeline starts.

use crate::error::HostwatchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration consumed by the sampling and analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between sampling ticks
    pub sample_interval: Duration,
    /// How much history the store retains per metric key
    pub retention: Duration,
    /// Number of processes tracked as per-process time series each tick
    pub top_process_count: usize,
    /// Standard-deviation multiplier for anomaly detection
    pub anomaly_k: f64,
    /// Trailing baseline length, in samples
    pub baseline_window: usize,
    /// Minimum baseline samples before the detector renders a verdict
    pub min_baseline_samples: usize,
    /// Symmetric window for anomaly/log correlation
    pub correlation_window: Duration,
    /// Whether the journal tailer source is registered at all
    pub log_source_enabled: bool,
    /// Upper bound on buffered log events
    pub max_log_events: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(2),
            retention: Duration::from_secs(3600),
            top_process_count: 20,
            anomaly_k: 3.0,
            baseline_window: 20,
            min_baseline_samples: 5,
            correlation_window: Duration::from_secs(30),
            log_source_enabled: true,
            max_log_events: 5000,
        }
    }
}

impl MonitorConfig {
    /// Check every field against its valid range.
    ///
    /// # Errors
    /// Returns `ConfigurationInvalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), HostwatchError> {
        if self.sample_interval.is_zero() {
            return Err(HostwatchError::ConfigurationInvalid(
                "sample_interval must be > 0".to_string(),
            ));
        }
        if self.retention < self.sample_interval {
            return Err(HostwatchError::ConfigurationInvalid(
                "retention must be at least one sample_interval".to_string(),
            ));
        }
        if self.anomaly_k <= 0.0 || !self.anomaly_k.is_finite() {
            return Err(HostwatchError::ConfigurationInvalid(
                "anomaly_k must be a positive finite number".to_string(),
            ));
        }
        if self.baseline_window == 0 {
            return Err(HostwatchError::ConfigurationInvalid(
                "baseline_window must be > 0".to_string(),
            ));
        }
        if self.min_baseline_samples == 0 || self.min_baseline_samples > self.baseline_window {
            return Err(HostwatchError::ConfigurationInvalid(
                "min_baseline_samples must be in 1..=baseline_window".to_string(),
            ));
        }
        if self.max_log_events == 0 {
            return Err(HostwatchError::ConfigurationInvalid(
                "max_log_events must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-key ring capacity derived from retention and cadence
    pub fn series_capacity(&self) -> usize {
        (self.retention.as_millis() / self.sample_interval.as_millis().max(1)) as usize
    }

    /// Per-source collection timeout: half the tick interval, so one slow
    /// source cannot consume the whole tick budget on its own.
    pub fn source_timeout(&self) -> Duration {
        self.sample_interval / 2
    }

    /// Hard ceiling on a whole tick before it is abandoned
    pub fn tick_hard_timeout(&self) -> Duration {
        self.sample_interval * 2
    }
}
