//! Saga activities.
//!
//! Each activity is one unit of saga work. Activities are cheap to clone so
//! the coordinator can move them into spawned tasks, and every one of them is
//! idempotent: a resumed saga re-executes the step that was in flight.

mod compensation;
mod create_order;
mod finalize;
mod inventory;
mod notify;
mod payment;

pub use compensation::{CancelOrder, CancelOutcome, ReleaseInventory};
pub use create_order::CreateOrder;
pub use finalize::{CompleteOrder, FailOrder};
pub use inventory::CheckInventory;
pub use notify::SendNotification;
pub use payment::ProcessPayment;

use std::sync::Arc;

use crate::config::SagaConfig;
use crate::services::{InventoryService, NotificationDispatcher, OrderRepository, PaymentService};

/// Ports the activities run against.
#[derive(Clone)]
pub struct SagaServices {
    pub orders: Arc<dyn OrderRepository>,
    pub inventory: Arc<dyn InventoryService>,
    pub payments: PaymentService,
    pub notifications: NotificationDispatcher,
}

/// Every activity of the order fulfillment saga.
#[derive(Clone)]
pub struct Activities {
    pub create_order: CreateOrder,
    pub check_inventory: CheckInventory,
    pub process_payment: ProcessPayment,
    pub send_notification: SendNotification,
    pub complete_order: CompleteOrder,
    pub fail_order: FailOrder,
    pub cancel_order: CancelOrder,
    pub release_inventory: ReleaseInventory,
}

impl Activities {
    pub fn new(services: &SagaServices, config: &SagaConfig) -> Self {
        Self {
            create_order: CreateOrder::new(services.orders.clone()),
            check_inventory: CheckInventory::new(services.orders.clone(), services.inventory.clone()),
            process_payment: ProcessPayment::new(
                services.orders.clone(),
                services.inventory.clone(),
                services.payments.clone(),
                config.currency.clone(),
                config.payment_method.clone(),
            ),
            send_notification: SendNotification::new(services.notifications.clone()),
            complete_order: CompleteOrder::new(services.orders.clone()),
            fail_order: FailOrder::new(services.orders.clone()),
            cancel_order: CancelOrder::new(
                services.orders.clone(),
                services.inventory.clone(),
                services.payments.clone(),
            ),
            release_inventory: ReleaseInventory::new(services.inventory.clone()),
        }
    }
}
