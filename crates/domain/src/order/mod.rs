//! Order record and its status state machine.

mod model;
mod status;
mod value_objects;

pub use model::Order;
pub use status::OrderStatus;
pub use value_objects::{Money, OrderItem};

use common::ProductId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Customer ID is required")]
    CustomerIdRequired,

    #[error("Order ID is required")]
    OrderIdRequired,

    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: ProductId, price: Money },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cannot cancel order in {0} status")]
    CannotCancel(OrderStatus),

    #[error("Order not found: {0}")]
    NotFound(String),
}
