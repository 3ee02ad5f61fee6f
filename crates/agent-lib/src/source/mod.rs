//! Metric and log-event sources
//!
//! This module provides the adapters between OS-specific interfaces and the
//! sampling pipeline: the procfs reader for CPU/memory/process metrics and
//! the journald tailer for log events. Sources are pure data producers;
//! they carry no analysis logic.

mod journal;
mod procfs;


pub use journal::JournalSource;
pub use procfs::ProcSource;

use crate::error::HostwatchError;
use crate::models::{LogEvent, ProcessSnapshot, Sample};
use chrono::{DateTime, Utc};

pub use async_trait::async_trait;

/// Everything one source produced for one sampling tick
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub samples: Vec<Sample>,
    /// Full process table, when the source captures one
    pub processes: Option<Vec<ProcessSnapshot>>,
    pub events: Vec<LogEvent>,
}

/// Capability implemented by every registered source.
///
/// `collect` must be safe to call repeatedly; internal state (previous
/// counters for rate computation) must never affect correctness. The
/// sampler bounds every invocation with a timeout, so implementations may
/// block briefly but must not hold OS resources across calls.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Stable identifier used in degraded-source markers and logs
    fn name(&self) -> &str;

    /// Produce one batch of observations, stamped with the tick timestamp
    /// the sampler provides.
    async fn collect(&self, now: DateTime<Utc>) -> Result<SourceBatch, HostwatchError>;
}
