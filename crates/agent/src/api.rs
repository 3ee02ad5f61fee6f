//! HTTP API for health checks, Prometheus metrics and read-only views of
//! the store (live snapshot, on-demand analysis report)

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use hostwatch_lib::{
    Analyzer, ComponentStatus, HealthRegistry, HostwatchMetrics, MonitorConfig, TimeSeriesStore,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: HostwatchMetrics,
    pub store: Arc<TimeSeriesStore>,
    pub analyzer: Arc<Analyzer>,
    pub monitor_config: MonitorConfig,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: HostwatchMetrics,
        store: Arc<TimeSeriesStore>,
        analyzer: Arc<Analyzer>,
        monitor_config: MonitorConfig,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            store,
            analyzer,
            monitor_config,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Live view: latest process table, scalars and per-source status
async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

/// On-demand analysis over the full retained range
async fn report(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let to = Utc::now();
    let retention = chrono::Duration::from_std(state.monitor_config.retention)
        .unwrap_or_else(|_| chrono::Duration::seconds(3600));
    let from = to - retention;

    match state.analyzer.analyze(&state.store, from, to) {
        Some(report) => (StatusCode::OK, Json(serde_json::json!(report))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "agent is shutting down" })),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/snapshot", get(snapshot))
        .route("/report", get(report))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
