//! Integration tests for the service router

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use cosmos_watchdog::api::{create_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;
use watchdog_lib::{
    engine::evaluation_windows,
    health::{components, HealthRegistry},
    models::MetricValue,
    observability::WatchdogMetrics,
    orchestrator::{PassOptions, Watchdog},
    providers::fake::{offer, FakeAccount, FakeCloud},
};

const IDLE_LINK: &str = "dbs/AbC=/colls/DeF=/";
const BUSY_LINK: &str = "dbs/AbC=/colls/XyZ=/";

fn estate() -> FakeCloud {
    let recent = evaluation_windows(Utc::now())[0].start + chrono::Duration::minutes(2);
    FakeCloud::new()
        .with_account(
            FakeAccount::new("orders-dev")
                .with_offer(offer("idle", IDLE_LINK, 1000), 400)
                .with_offer(offer("busy", BUSY_LINK, 1000), 400),
        )
        .with_metric("orders-dev", "AbC=", "XyZ=", MetricValue::new(recent, 35.0))
}

async fn setup_test_app(cloud: FakeCloud, dry_run: bool) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::PROVIDERS).await;
    health_registry.register(components::LAST_PASS).await;

    let cloud = Arc::new(cloud);
    let watchdog = Watchdog::new(cloud.clone(), cloud.clone(), cloud);
    let options = PassOptions::new("sub-1").with_dry_run(dry_run);
    let state = Arc::new(AppState::new(watchdog, options, health_registry));

    (create_router(state.clone()), state)
}

async fn body_text(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_run_returns_report() {
    let cloud = estate();
    let (app, _state) = setup_test_app(cloud.clone(), false).await;

    let response = app.oneshot(request(Method::POST, "/api/v1/run")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "dbs/AbC=/colls/DeF=/ - CollectionOffer: Scaled down to 400 RUs\n"
    );
    let replacements = cloud.replacements();
    assert_eq!(replacements.len(), 1);
    assert_eq!(replacements[0].offer_id, "idle");
}

#[tokio::test]
async fn test_run_accepts_get_and_json() {
    let (app, _state) = setup_test_app(estate(), true).await;

    let response = app
        .oneshot(request(Method::GET, "/api/v1/run?format=json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(report["accounts_evaluated"], 1);
    assert_eq!(report["offers_evaluated"], 2);
    assert_eq!(report["deadline_exceeded"], false);
    assert_eq!(report["downscaled"][0]["applied"], false);
}

#[tokio::test]
async fn test_run_failure_returns_500_and_degrades() {
    let (app, state) = setup_test_app(FakeCloud::new().with_failing_account_listing(), false).await;

    let response = app.oneshot(request(Method::POST, "/api/v1/run")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("list accounts"));

    let health = state.health_registry.health().await;
    assert_eq!(
        health.components[components::LAST_PASS].status,
        watchdog_lib::ComponentStatus::Degraded
    );
    assert_eq!(
        health.components[components::PROVIDERS].status,
        watchdog_lib::ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_skipped_account_degrades_providers() {
    let cloud = FakeCloud::new()
        .with_account(FakeAccount::new("orders-dev").with_offer(offer("idle", IDLE_LINK, 1000), 400))
        .with_account(FakeAccount::new("carts-dev").without_key());
    let (app, state) = setup_test_app(cloud, false).await;

    let response = app.oneshot(request(Method::POST, "/api/v1/run")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let providers = state
        .health_registry
        .component(components::PROVIDERS)
        .await
        .unwrap();
    assert_eq!(providers.status, watchdog_lib::ComponentStatus::Degraded);
    assert_eq!(providers.message.as_deref(), Some("1 of 2 accounts skipped"));
    assert_eq!(
        state
            .health_registry
            .component(components::LAST_PASS)
            .await
            .unwrap()
            .status,
        watchdog_lib::ComponentStatus::Healthy
    );
}

#[tokio::test]
async fn test_concurrent_runs_are_serialized() {
    let cloud = estate();
    let (app, _state) = setup_test_app(cloud.clone(), false).await;

    let (first, second) = tokio::join!(
        app.clone().oneshot(request(Method::POST, "/api/v1/run")),
        app.oneshot(request(Method::POST, "/api/v1/run")),
    );
    assert_eq!(first.unwrap().status(), StatusCode::OK);
    assert_eq!(second.unwrap().status(), StatusCode::OK);

    // The fake keeps offers at their listed throughput, so both passes downscale
    assert_eq!(cloud.replacements().len(), 2);
}

#[tokio::test]
async fn test_healthz_lists_components() {
    let (app, _state) = setup_test_app(estate(), false).await;

    let response = app.oneshot(request(Method::GET, "/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["scheduler"].is_object());
    assert!(health["components"]["providers"].is_object());
    assert!(health["components"]["last_pass"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app(estate(), false).await;
    state
        .health_registry
        .set_unhealthy(components::PROVIDERS, "no credentials")
        .await;

    let response = app.oneshot(request(Method::GET, "/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_readyz_follows_registry() {
    let (app, state) = setup_test_app(estate(), false).await;

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/readyz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.health_registry.set_ready(true).await;
    let response = app.oneshot(request(Method::GET, "/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app(estate(), false).await;
    let metrics = WatchdogMetrics::new();
    metrics.observe_pass(1.5, true);
    metrics.record_downscale(1000, 400);

    let response = app.oneshot(request(Method::GET, "/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let metrics_text = body_text(response).await;
    assert!(metrics_text.contains("cosmos_watchdog_pass_duration_seconds_bucket"));
    assert!(metrics_text.contains("cosmos_watchdog_passes_total"));
    assert!(metrics_text.contains("cosmos_watchdog_throughput_reclaimed_ru_total"));
}
