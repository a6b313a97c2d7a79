//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}

/// Registers descriptions for the metrics the engine records.
pub fn describe() {
    describe_counter!("saga_executions_total", "Sagas started");
    describe_counter!("saga_completed", "Sagas that completed the order");
    describe_counter!("saga_failed", "Sagas that ended on the failure path");
    describe_counter!("saga_cancelled", "Sagas cancelled on request");
    describe_histogram!(
        "saga_duration_seconds",
        Unit::Seconds,
        "Wall time from saga start to its terminal state"
    );
    describe_counter!("saga_step_retries_total", "Activity retries by step");
    describe_counter!(
        "saga_cancellations_rejected_total",
        "Cancel requests refused past the payment step"
    );
    describe_counter!("saga_refund_failures_total", "Refunds the gateway rejected");
    describe_counter!(
        "saga_notification_failures_total",
        "Customer notifications that could not be delivered"
    );
    describe_counter!(
        "reservations_expired_total",
        "Reservations released by the expiry sweep"
    );
}
