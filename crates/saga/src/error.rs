//! Saga error types.
//!
//! Activities report failures as [`StepError`], tagged with an
//! [`ErrorKind`] that alone decides retry and compensation, plus an
//! [`ErrorCode`] that is surfaced to callers.

use common::AggregateId;
use domain::{DomainError, InventoryError, NotificationError, OrderError, OrderStatus, PaymentError};
use event_store::EventStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order_fulfillment::Step;
use crate::services::ServiceError;

/// Classification of an activity failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    /// Illegal state transition or duplicate payment.
    StateConflict,
    /// Inventory unavailable or payment declined.
    BusinessDecline,
    Transient,
    /// Unexpected failure, possibly after money moved.
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Internal)
    }
}

/// Externally visible error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    InventoryUnavailable,
    PaymentFailed,
    NotificationFailed,
    OrderCancelled,
    OrderNotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InventoryUnavailable => "INVENTORY_UNAVAILABLE",
            ErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ErrorCode::NotificationFailed => "NOTIFICATION_FAILED",
            ErrorCode::OrderCancelled => "ORDER_CANCELLED",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified activity failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{step} failed [{code}]: {message}")]
pub struct StepError {
    pub step: Step,
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
}

impl StepError {
    pub fn new(step: Step, kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn validation(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, ErrorKind::Validation, ErrorCode::ValidationError, message)
    }

    pub fn decline(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, ErrorKind::BusinessDecline, step.failure_code(), message)
    }

    pub fn transient(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, ErrorKind::Transient, step.failure_code(), message)
    }

    pub fn internal(step: Step, message: impl Into<String>) -> Self {
        Self::new(step, ErrorKind::Internal, ErrorCode::InternalError, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn order(step: Step, err: &OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::CustomerIdRequired
            | OrderError::OrderIdRequired
            | OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. } => Self::validation(step, message),
            OrderError::NotFound(_) => Self::new(
                step,
                ErrorKind::NotFound,
                ErrorCode::OrderNotFound,
                message,
            ),
            OrderError::InvalidStatusTransition {
                from: OrderStatus::Cancelled,
                ..
            }
            | OrderError::CannotCancel(OrderStatus::Cancelled) => Self::new(
                step,
                ErrorKind::StateConflict,
                ErrorCode::OrderCancelled,
                message,
            ),
            OrderError::InvalidStatusTransition { .. } | OrderError::CannotCancel(_) => Self::new(
                step,
                ErrorKind::StateConflict,
                ErrorCode::InternalError,
                message,
            ),
        }
    }

    pub fn inventory(step: Step, err: &InventoryError) -> Self {
        let message = err.to_string();
        match err {
            InventoryError::InsufficientStock { .. } => Self::new(
                step,
                ErrorKind::BusinessDecline,
                ErrorCode::InventoryUnavailable,
                message,
            ),
            InventoryError::ProductNotFound(_) | InventoryError::ReservationNotFound(_) => {
                Self::new(
                    step,
                    ErrorKind::NotFound,
                    ErrorCode::InventoryUnavailable,
                    message,
                )
            }
            InventoryError::ReservationMismatch { .. } => Self::new(
                step,
                ErrorKind::StateConflict,
                ErrorCode::InventoryUnavailable,
                message,
            ),
            InventoryError::InvalidQuantity { .. } => Self::validation(step, message),
        }
    }

    pub fn payment(step: Step, err: &PaymentError) -> Self {
        let message = err.to_string();
        match err {
            PaymentError::Validation(_) => Self::validation(step, message),
            PaymentError::NotFound(_) => Self::new(
                step,
                ErrorKind::NotFound,
                ErrorCode::PaymentFailed,
                message,
            ),
            PaymentError::Duplicate(_)
            | PaymentError::InvalidTransition { .. }
            | PaymentError::CannotRefund(_) => Self::new(
                step,
                ErrorKind::StateConflict,
                ErrorCode::PaymentFailed,
                message,
            ),
        }
    }

    pub fn notification(step: Step, err: &NotificationError) -> Self {
        let message = err.to_string();
        match err {
            NotificationError::Validation(_) => Self::validation(step, message),
            NotificationError::UnsupportedChannel(_) => Self::new(
                step,
                ErrorKind::Validation,
                ErrorCode::NotificationFailed,
                message,
            ),
            NotificationError::Send(_) => Self::new(
                step,
                ErrorKind::Transient,
                ErrorCode::NotificationFailed,
                message,
            ),
            NotificationError::NotFound(_) => Self::new(
                step,
                ErrorKind::NotFound,
                ErrorCode::NotificationFailed,
                message,
            ),
            NotificationError::NotFailed(_) => Self::new(
                step,
                ErrorKind::StateConflict,
                ErrorCode::NotificationFailed,
                message,
            ),
        }
    }

    pub fn domain(step: Step, err: &DomainError) -> Self {
        match err {
            DomainError::Order(e) => Self::order(step, e),
            DomainError::Inventory(e) => Self::inventory(step, e),
            DomainError::Payment(e) => Self::payment(step, e),
            DomainError::Notification(e) => Self::notification(step, e),
        }
    }

    pub fn service(step: Step, err: &ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Domain(e) => Self::domain(step, e),
            ServiceError::NotFound { entity: "order", .. } => Self::new(
                step,
                ErrorKind::NotFound,
                ErrorCode::OrderNotFound,
                message,
            ),
            ServiceError::NotFound { .. } => {
                Self::new(step, ErrorKind::NotFound, step.failure_code(), message)
            }
            ServiceError::Conflict { .. } => {
                Self::new(step, ErrorKind::StateConflict, step.failure_code(), message)
            }
            ServiceError::Unavailable(_) => Self::transient(step, message),
            ServiceError::Declined(_) => Self::decline(step, message),
        }
    }
}

/// Errors raised by the saga engine itself rather than by an activity.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Saga not found: {0}")]
    NotFound(AggregateId),

    #[error("Saga {0} is already running")]
    AlreadyRunning(AggregateId),

    #[error("Saga {0} has already finished")]
    AlreadyFinished(AggregateId),

    /// The saga is unfinished but no run is active for it.
    #[error("Saga {0} is not running")]
    NotRunning(AggregateId),

    #[error("Cancellation rejected: {0}")]
    CancellationRejected(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Unknown query: {0}")]
    UnknownQuery(String),

    #[error("Invalid saga input: {0}")]
    InvalidInput(String),

    /// The saga run stopped without producing an outcome.
    #[error("Saga aborted: {0}")]
    Aborted(String),

    #[error("Journal error: {0}")]
    Journal(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn only_transient_and_internal_are_retryable() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Internal.is_retryable());
        for kind in [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::StateConflict,
            ErrorKind::BusinessDecline,
        ] {
            assert!(!kind.is_retryable());
        }
    }

    #[test]
    fn codes_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InventoryUnavailable).unwrap(),
            "\"INVENTORY_UNAVAILABLE\""
        );
        assert_eq!(ErrorCode::OrderNotFound.to_string(), "ORDER_NOT_FOUND");
    }

    #[test]
    fn insufficient_stock_is_a_business_decline() {
        let err = StepError::inventory(
            Step::CheckInventory,
            &InventoryError::InsufficientStock {
                product_id: ProductId::new("SKU-2"),
                requested: 1,
                available: 0,
            },
        );
        assert_eq!(err.kind, ErrorKind::BusinessDecline);
        assert_eq!(err.code, ErrorCode::InventoryUnavailable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn order_errors_are_classified() {
        let invalid = StepError::order(Step::CreateOrder, &OrderError::NoItems);
        assert_eq!(invalid.kind, ErrorKind::Validation);
        assert_eq!(invalid.code, ErrorCode::ValidationError);

        let cancelled = StepError::order(
            Step::ProcessPayment,
            &OrderError::InvalidStatusTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Payment,
            },
        );
        assert_eq!(cancelled.kind, ErrorKind::StateConflict);
        assert_eq!(cancelled.code, ErrorCode::OrderCancelled);
    }

    #[test]
    fn unavailable_service_is_transient() {
        let err = StepError::service(
            Step::ProcessPayment,
            &ServiceError::Unavailable("connection reset".into()),
        );
        assert_eq!(err.kind, ErrorKind::Transient);
        assert_eq!(err.code, ErrorCode::PaymentFailed);
    }

    #[test]
    fn missing_order_row_maps_to_order_not_found() {
        let err = StepError::service(
            Step::Complete,
            &ServiceError::NotFound {
                entity: "order",
                id: "ord-1".into(),
            },
        );
        assert_eq!(err.code, ErrorCode::OrderNotFound);
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn gateway_decline_is_not_retryable() {
        let err = StepError::service(
            Step::ProcessPayment,
            &ServiceError::Declined("insufficient funds".into()),
        );
        assert_eq!(err.kind, ErrorKind::BusinessDecline);
        assert_eq!(err.code, ErrorCode::PaymentFailed);
        assert!(!err.is_retryable());
    }
}
