//! Fixed-cadence sampling loop
//!
//! Drives one collection pass per tick across all registered sources,
//! isolating per-source failures and writing exactly one batch (or one
//! degraded marker) per source per tick into the store.
//!
//! Scheduling is anchored to the loop's start instant: the k-th tick fires
//! at t0 + k * interval regardless of how long earlier ticks took. A tick
//! that overruns its slot is skipped, never retried, so slow sources do not
//! compound delay across the run.

use crate::config::MonitorConfig;
use crate::health::{components, HealthRegistry};
use crate::models::{ProcessSnapshot, SourceState, SourceStatus};
use crate::observability::{HostwatchMetrics, StructuredLogger};
use crate::source::MetricSource;
use crate::store::TimeSeriesStore;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Timing parameters for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Interval between tick starts
    pub interval: Duration,
    /// Budget for one source's collect call
    pub source_timeout: Duration,
    /// Ceiling on a whole tick before it is abandoned
    pub tick_hard_timeout: Duration,
}

impl SamplerConfig {
    pub fn from_monitor(config: &MonitorConfig) -> Self {
        Self {
            interval: config.sample_interval,
            source_timeout: config.source_timeout(),
            tick_hard_timeout: config.tick_hard_timeout(),
        }
    }
}

/// The pipeline's sole writer: pulls one snapshot from each source per
/// tick and appends it to the store.
pub struct Sampler {
    sources: Vec<Arc<dyn MetricSource>>,
    store: Arc<TimeSeriesStore>,
    config: SamplerConfig,
    health: HealthRegistry,
    metrics: HostwatchMetrics,
    logger: StructuredLogger,
}

impl Sampler {
    pub fn new(store: Arc<TimeSeriesStore>, config: SamplerConfig, health: HealthRegistry) -> Self {
        Self {
            sources: Vec::new(),
            store,
            config,
            health,
            metrics: HostwatchMetrics::new(),
            logger: StructuredLogger::new(hostname()),
        }
    }

    /// Explicitly register a source; registration order is the per-tick
    /// iteration order, which carries no cross-key guarantees.
    pub fn register_source(&mut self, source: Arc<dyn MetricSource>) {
        self.sources.push(source);
    }

    /// Run until the shutdown signal fires. The signal is observed within
    /// one tick boundary; the count of completed ticks is returned.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) -> u64 {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            sources = self.sources.len(),
            "Starting sampling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let tick_ts = Utc::now();

                    let outcome =
                        tokio::time::timeout(self.config.tick_hard_timeout, self.tick(tick_ts))
                            .await;
                    if outcome.is_err() {
                        warn!(tick = tick_count, "tick abandoned after hard timeout");
                    }

                    tick_count += 1;
                    self.metrics.inc_ticks_completed();
                    self.metrics.observe_tick_latency(started.elapsed().as_secs_f64());

                    if tick_count % 30 == 0 {
                        debug!(
                            ticks = tick_count,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Collection cycle complete"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!(ticks = tick_count, "Shutting down sampling loop");
                    break;
                }
            }
        }
        tick_count
    }

    /// One collection pass: every source is invoked under its timeout and
    /// contributes either a write batch or a degraded marker.
    async fn tick(&self, tick_ts: DateTime<Utc>) {
        let mut degraded = 0usize;
        let mut scalars = BTreeMap::new();
        let mut processes: Option<Vec<ProcessSnapshot>> = None;

        for source in &self.sources {
            let collected =
                tokio::time::timeout(self.config.source_timeout, source.collect(tick_ts)).await;

            match collected {
                Ok(Ok(batch)) => {
                    self.store.append_samples(&batch.samples);
                    for sample in &batch.samples {
                        if !sample.key.starts_with("proc.") || sample.key == "proc.count" {
                            scalars.insert(sample.key.clone(), sample.value);
                        }
                    }
                    if batch.processes.is_some() {
                        processes = batch.processes;
                    }
                    self.store.append_events(batch.events);
                    self.store.record_source_status(SourceStatus {
                        source: source.name().to_string(),
                        last_tick: tick_ts,
                        state: SourceState::Ok,
                    });
                }
                Ok(Err(e)) => {
                    degraded += 1;
                    self.degrade(source.name(), tick_ts, e.to_string());
                }
                Err(_) => {
                    degraded += 1;
                    self.degrade(
                        source.name(),
                        tick_ts,
                        format!("collect exceeded {:?}", self.config.source_timeout),
                    );
                }
            }
        }

        self.store.update_live(tick_ts, processes, scalars);

        if degraded > 0 {
            self.health
                .set_degraded(
                    components::SAMPLER,
                    format!("{degraded} source(s) degraded last tick"),
                )
                .await;
        } else {
            self.health.set_healthy(components::SAMPLER).await;
        }
    }

    /// Record the degraded-sample marker: one write per source per tick,
    /// value omitted, error retained.
    fn degrade(&self, source: &str, tick_ts: DateTime<Utc>, reason: String) {
        self.metrics.inc_source_errors();
        self.logger.log_source_degraded(source, &reason);
        self.store.record_source_status(SourceStatus {
            source: source.to_string(),
            last_tick: tick_ts,
            state: SourceState::Degraded { error: reason },
        });
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
