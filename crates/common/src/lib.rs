//! Shared identifier types for the order fulfillment workspace.

mod types;

pub use types::{AggregateId, CustomerId, NotificationId, OrderId, PaymentId, ProductId, ReservationId};
