//! Hostwatch agent - host performance and log monitoring
//!
//! Samples host metrics and journal events at a fixed cadence into a
//! bounded in-memory store, serves live snapshots and on-demand analysis
//! reports, and writes a final report on shutdown.

use anyhow::{Context, Result};
use hostwatch_lib::{
    health::components, Analyzer, HealthRegistry, HostwatchMetrics, JournalSource, MetricSource,
    ProcSource, Sampler, SamplerConfig, StructuredLogger, TimeSeriesStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting hostwatch-agent");

    // Load and validate configuration before anything starts sampling
    let agent_config = config::AgentConfig::load()?;
    let monitor_config = agent_config.monitor_config()?;
    info!(
        host = %agent_config.host_name,
        interval_secs = agent_config.sample_interval_secs,
        "Agent configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::STORE).await;
    health_registry.register(components::ANALYSIS).await;
    if monitor_config.log_source_enabled {
        health_registry.register(components::LOG_TAILER).await;
    }

    // Initialize metrics and structured logging
    let metrics = HostwatchMetrics::new();
    let logger = StructuredLogger::new(&agent_config.host_name);
    logger.log_startup(AGENT_VERSION, agent_config.sample_interval_secs);

    // The store is the only shared mutable structure; it is constructed
    // here and passed through the pipeline explicitly.
    let store = Arc::new(TimeSeriesStore::new(
        monitor_config.retention,
        monitor_config.sample_interval,
        monitor_config.max_log_events,
    ));

    let cancelled = Arc::new(AtomicBool::new(false));
    let analyzer = Arc::new(
        Analyzer::new(&monitor_config).with_cancel_flag(Arc::clone(&cancelled)),
    );

    // Register sources explicitly
    let mut sampler = Sampler::new(
        Arc::clone(&store),
        SamplerConfig::from_monitor(&monitor_config),
        health_registry.clone(),
    );
    sampler.register_source(Arc::new(ProcSource::new(monitor_config.top_process_count)));
    if monitor_config.log_source_enabled {
        sampler.register_source(Arc::new(JournalSource::new(monitor_config.source_timeout()))
            as Arc<dyn MetricSource>);
    }

    // Create shared application state for the API
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        Arc::clone(&store),
        Arc::clone(&analyzer),
        monitor_config.clone(),
    ));

    // Single cancellation signal tears down the whole pipeline
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let sampler_handle = tokio::spawn(sampler.run(shutdown_rx));

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let _api_handle = tokio::spawn(api::serve(agent_config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    shutdown_tx
        .send(())
        .context("sampler already shut down")?;
    let ticks = sampler_handle.await.unwrap_or(0);
    info!(ticks, "Sampling stopped");

    // One final analysis pass over everything retained, exported for the
    // external renderer, then no further passes may start.
    let to = chrono::Utc::now();
    let from = to
        - chrono::Duration::from_std(monitor_config.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
    if let Some(report) = analyzer.analyze(&store, from, to) {
        logger.log_report(
            report.findings.len(),
            report.health_score,
            report.omitted_keys.len(),
        );
        if let Some(path) = &agent_config.report_path {
            let json = serde_json::to_vec_pretty(&report).context("serializing final report")?;
            std::fs::write(path, json)
                .with_context(|| format!("writing final report to {path}"))?;
            info!(path = %path, "Final report written");
        }
    }
    cancelled.store(true, Ordering::Release);

    info!("Shutting down");
    Ok(())
}
