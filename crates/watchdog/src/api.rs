//! HTTP API: pass trigger, health checks and Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use watchdog_lib::{
    health::{ComponentStatus, HealthRegistry},
    orchestrator::{PassOptions, Watchdog},
    report::PassReport,
    WatchdogError,
};

/// Shared application state
pub struct AppState {
    pub watchdog: Watchdog,
    pub options: PassOptions,
    pub health_registry: HealthRegistry,
    pass_lock: Mutex<()>,
}

impl AppState {
    pub fn new(watchdog: Watchdog, options: PassOptions, health_registry: HealthRegistry) -> Self {
        Self {
            watchdog,
            options,
            health_registry,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one pass, waiting for any pass already in flight
    pub async fn run_pass(&self) -> Result<PassReport, WatchdogError> {
        let _guard = self.pass_lock.lock().await;
        let result = self.watchdog.run_pass(&self.options).await;

        self.health_registry.record_pass(&result).await;

        result
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    /// `json` for the structured report; plain text otherwise
    #[serde(default)]
    pub format: Option<String>,
}

/// Run a pass - 200 with the report, 500 with the error
async fn run(State(state): State<Arc<AppState>>, Query(params): Query<RunParams>) -> Response {
    info!("Pass triggered over HTTP");
    match state.run_pass().await {
        Ok(report) if params.format.as_deref() == Some("json") => {
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(report) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            report.render(),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Triggered pass failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/run", get(run).post(run))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
