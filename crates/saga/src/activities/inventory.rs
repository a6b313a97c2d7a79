use std::sync::Arc;

use common::OrderId;
use domain::OrderStatus;

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::{InventoryService, OrderRepository, ReservationOutcome};

/// Moves the order to `Validating` and reserves its items.
///
/// Missing stock is reported as `available = false`, not as an error.
#[derive(Clone)]
pub struct CheckInventory {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryService>,
}

impl CheckInventory {
    pub fn new(orders: Arc<dyn OrderRepository>, inventory: Arc<dyn InventoryService>) -> Self {
        Self { orders, inventory }
    }

    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute(&self, order_id: OrderId) -> Result<ReservationOutcome, StepError> {
        let step = Step::CheckInventory;
        let mut order = self
            .orders
            .get(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;

        if order.status != OrderStatus::Validating {
            order
                .update_status(OrderStatus::Validating)
                .map_err(|e| StepError::order(step, &e))?;
            self.orders
                .update(order.clone())
                .await
                .map_err(|e| StepError::service(step, &e))?;
        }

        let outcome = self
            .inventory
            .check_and_reserve(&order_id, &order.items)
            .await
            .map_err(|e| StepError::service(step, &e))?;

        if outcome.available {
            tracing::info!(reservations = outcome.reservations.len(), "inventory reserved");
        } else {
            tracing::warn!(unavailable = outcome.unavailable.len(), "inventory unavailable");
        }
        Ok(outcome)
    }
}
