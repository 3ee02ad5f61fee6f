//! Core library for the hostwatch agent
//!
//! This crate provides the collection-and-analysis engine:
//! - Metric and log-event sources (procfs, journald)
//! - The fixed-cadence sampling loop
//! - Bounded time-series storage with snapshot and range queries
//! - Anomaly detection and anomaly/log correlation
//! - Health checks and observability

pub mod analysis;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod source;
pub mod store;

pub use analysis::{Analyzer, AnomalyDetector, Correlator};
pub use config::MonitorConfig;
pub use error::HostwatchError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{HostwatchMetrics, StructuredLogger};
pub use sampler::{Sampler, SamplerConfig};
pub use source::{JournalSource, MetricSource, ProcSource, SourceBatch};
pub use store::TimeSeriesStore;
