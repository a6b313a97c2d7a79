//! Process hosting the order fulfillment saga engine.
//!
//! Wires the engine to in-memory adapters and a demo catalog, and serves
//! health and Prometheus metrics over HTTP.

pub mod config;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use domain::{Money, Product};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryInventoryService, InMemoryNotificationRepository, InMemoryNotificationSender,
    InMemoryOrderRepository, InMemoryPaymentGateway, InMemoryPaymentRepository,
    NotificationDispatcher, PaymentService, ReservationSweeper, SagaConfig, SagaEngine,
    SagaServices,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Creates the Axum application router.
pub fn create_app(engine: SagaEngine, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(engine)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Products the worker starts with.
pub fn demo_catalog() -> Vec<Product> {
    vec![
        Product::new("PROD-001", "Standard widget", Money::from_cents(1_999), 50),
        Product::new("PROD-002", "Deluxe widget", Money::from_cents(4_999), 25),
        Product::new("PROD-003", "Discontinued widget", Money::from_cents(999), 0),
    ]
}

/// Engine plus the pieces the process drives alongside it.
pub struct Worker {
    pub engine: SagaEngine,
    pub inventory: Arc<InMemoryInventoryService>,
    pub sweeper: ReservationSweeper,
}

/// Builds the engine over in-memory adapters seeded with [`demo_catalog`].
pub fn build_worker(config: SagaConfig, store: Arc<dyn EventStore>) -> Worker {
    let inventory = Arc::new(InMemoryInventoryService::with_products(
        config.reservation_ttl,
        demo_catalog(),
    ));
    let payments = PaymentService::new(
        Arc::new(InMemoryPaymentGateway::new()),
        Arc::new(InMemoryPaymentRepository::new()),
    );
    let notifications =
        NotificationDispatcher::new(Arc::new(InMemoryNotificationRepository::new()))
            .with_sender(Arc::new(InMemoryNotificationSender::default()));

    let services = SagaServices {
        orders: Arc::new(InMemoryOrderRepository::new()),
        inventory: inventory.clone(),
        payments,
        notifications,
    };
    let sweeper = ReservationSweeper::new(inventory.clone(), config.sweep_interval);
    let engine = SagaEngine::new(config, services, store);

    Worker {
        engine,
        inventory,
        sweeper,
    }
}
