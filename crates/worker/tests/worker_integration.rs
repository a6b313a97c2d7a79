//! Integration tests for the worker.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{CustomerId, ProductId};
use domain::{Money, OrderItem, OrderStatus};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ErrorCode, InventoryService, SagaConfig};
use tower::ServiceExt;
use worker::Worker;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Worker) {
    let worker = worker::build_worker(
        SagaConfig::for_testing(),
        Arc::new(InMemoryEventStore::new()),
    );
    let app = worker::create_app(worker.engine.clone(), get_metrics_handle());
    (app, worker)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn order(product: &str, quantity: u32) -> Vec<OrderItem> {
    vec![OrderItem::new(product, quantity, Money::from_cents(1_999))]
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["running_sagas"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_saga_counters() {
    let (app, worker) = setup();
    worker::routes::metrics::describe();

    let handle = worker
        .engine
        .start_saga(CustomerId::new("cust-metrics"), order("PROD-001", 1))
        .await
        .unwrap();
    handle.outcome().await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_executions_total"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_demo_catalog_order_completes() {
    let (_, worker) = setup();

    let handle = worker
        .engine
        .start_saga(CustomerId::new("cust-1"), order("PROD-002", 5))
        .await
        .unwrap();
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);

    let product = worker
        .inventory
        .product(&ProductId::new("PROD-002"))
        .await
        .unwrap();
    assert_eq!(product.available, 20);
}

#[tokio::test]
async fn test_discontinued_product_fails_inventory_check() {
    let (_, worker) = setup();

    let handle = worker
        .engine
        .start_saga(CustomerId::new("cust-1"), order("PROD-003", 1))
        .await
        .unwrap();
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::InventoryUnavailable));
}

#[tokio::test]
async fn test_sweeper_has_nothing_to_release_after_completed_orders() {
    let (_, worker) = setup();

    let handle = worker
        .engine
        .start_saga(CustomerId::new("cust-1"), order("PROD-001", 2))
        .await
        .unwrap();
    handle.outcome().await.unwrap();

    let far_future = chrono::Utc::now() + chrono::Duration::days(1);
    assert_eq!(worker.sweeper.sweep_once(far_future).await, 0);
}
