//! Domain error types.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::notification::NotificationError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Any rule violation raised by the domain entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}
