//! Ports the activities depend on, with in-memory adapters.

pub mod inventory;
pub mod notification;
pub mod orders;
pub mod payment;

pub use inventory::{InMemoryInventoryService, InventoryService, ReservationOutcome};
pub use notification::{
    InMemoryNotificationRepository, InMemoryNotificationSender, NotificationDispatcher,
    NotificationRepository, NotificationRequest, NotificationSender,
};
pub use orders::{InMemoryOrderRepository, OrderRepository};
pub use payment::{
    InMemoryPaymentGateway, InMemoryPaymentRepository, PaymentGateway, PaymentRepository,
    PaymentService,
};

use domain::{DomainError, InventoryError, NotificationError, OrderError, PaymentError};
use thiserror::Error;

/// Failure reported by a service or repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    Conflict { entity: &'static str, id: String },

    /// The backing store or remote service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A remote party refused the request.
    #[error("Declined: {0}")]
    Declined(String),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<OrderError> for ServiceError {
    fn from(e: OrderError) -> Self {
        Self::Domain(e.into())
    }
}

impl From<InventoryError> for ServiceError {
    fn from(e: InventoryError) -> Self {
        Self::Domain(e.into())
    }
}

impl From<PaymentError> for ServiceError {
    fn from(e: PaymentError) -> Self {
        Self::Domain(e.into())
    }
}

impl From<NotificationError> for ServiceError {
    fn from(e: NotificationError) -> Self {
        Self::Domain(e.into())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
