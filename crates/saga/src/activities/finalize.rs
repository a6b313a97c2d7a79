use std::sync::Arc;

use common::OrderId;
use domain::{Order, OrderStatus};

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::OrderRepository;

/// Moves a paid order to `Completed`.
#[derive(Clone)]
pub struct CompleteOrder {
    orders: Arc<dyn OrderRepository>,
}

impl CompleteOrder {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute(&self, order_id: OrderId) -> Result<Order, StepError> {
        let step = Step::Complete;
        let mut order = self
            .orders
            .get(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;
        order
            .update_status(OrderStatus::Completed)
            .map_err(|e| StepError::order(step, &e))?;
        self.orders
            .update(order.clone())
            .await
            .map_err(|e| StepError::service(step, &e))?;
        Ok(order)
    }
}

/// Moves an order to `Failed`, keeping the first recorded reason.
#[derive(Clone)]
pub struct FailOrder {
    orders: Arc<dyn OrderRepository>,
}

impl FailOrder {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    #[tracing::instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn execute(
        &self,
        step: Step,
        order_id: OrderId,
        reason: String,
    ) -> Result<Order, StepError> {
        let mut order = self
            .orders
            .get(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;
        order
            .set_failure(reason)
            .map_err(|e| StepError::order(step, &e))?;
        self.orders
            .update(order.clone())
            .await
            .map_err(|e| StepError::service(step, &e))?;
        Ok(order)
    }
}
