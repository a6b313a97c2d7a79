//! Domain layer for order fulfillment.
//!
//! Pure state machines with no I/O:
//! - `order`: order record and its status allow-list
//! - `inventory`: product stock and time-limited reservations
//! - `payment`: payment records and their forward-only lifecycle
//! - `notification`: customer notifications and message templates
//!
//! The `Aggregate` and `DomainEvent` traits are used by the saga journal.

pub mod aggregate;
pub mod error;
pub mod inventory;
pub mod notification;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use inventory::{InventoryError, Product, Reservation, UnavailableItem};
pub use notification::{
    Channel, Notification, NotificationError, NotificationStatus, NotificationType,
};
pub use order::{Money, Order, OrderError, OrderItem, OrderStatus};
pub use payment::{ChargeRequest, Payment, PaymentError, PaymentStatus};
