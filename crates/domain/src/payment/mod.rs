//! Payment records and their lifecycle.

mod model;

pub use model::{ChargeRequest, Payment, PaymentStatus};

use common::{OrderId, PaymentId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Invalid payment request: {0}")]
    Validation(String),

    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    #[error("Order {0} has already been charged")]
    Duplicate(OrderId),

    #[error("Invalid payment transition from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Cannot refund payment in {0} status")]
    CannotRefund(PaymentStatus),
}
