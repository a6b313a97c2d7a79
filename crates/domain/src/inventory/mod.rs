//! Product stock and time-limited reservations.

mod product;
mod reservation;

pub use product::Product;
pub use reservation::{Reservation, UnavailableItem, default_reservation_ttl};

use common::{OrderId, ProductId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("No reservation for order {0}")]
    ReservationNotFound(OrderId),

    #[error("Reservation for {product_id} holds {held} of {expected} ordered units")]
    ReservationMismatch {
        product_id: ProductId,
        expected: u32,
        held: u32,
    },

    #[error("Invalid quantity for {product_id}: {quantity}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },
}
