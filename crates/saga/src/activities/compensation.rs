use std::sync::Arc;

use common::{OrderId, PaymentId};
use domain::{PaymentError, PaymentStatus};

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::{InventoryService, OrderRepository, PaymentService, ServiceError};

/// What a cancellation undid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    /// `false` when the order record was never created.
    pub order_found: bool,
    pub refunded: Option<PaymentId>,
    /// Set when a refund was attempted and failed.
    pub refund_error: Option<String>,
    pub released: usize,
}

/// Refunds, releases stock, then marks the order cancelled.
///
/// A failed refund is logged and counted but does not stop the
/// cancellation.
#[derive(Clone)]
pub struct CancelOrder {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryService>,
    payments: PaymentService,
}

impl CancelOrder {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryService>,
        payments: PaymentService,
    ) -> Self {
        Self {
            orders,
            inventory,
            payments,
        }
    }

    /// `step` is the step the cancellation interrupted.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute(
        &self,
        step: Step,
        order_id: OrderId,
        payment_id: Option<PaymentId>,
    ) -> Result<CancelOutcome, StepError> {
        // a charge may have finished after the saga stopped waiting for it
        let payment_id = match payment_id {
            Some(id) => Some(id),
            None => self
                .payments
                .completed_for_order(&order_id)
                .await
                .map_err(|e| StepError::service(step, &e))?
                .map(|p| p.id),
        };

        let mut refunded = None;
        let mut refund_error = None;
        if let Some(payment_id) = payment_id {
            match self.payments.refund(&payment_id).await {
                Ok(_) => refunded = Some(payment_id),
                Err(ServiceError::Domain(domain::DomainError::Payment(
                    PaymentError::CannotRefund(PaymentStatus::Refunded),
                ))) => refunded = Some(payment_id),
                Err(e) => {
                    tracing::error!(
                        payment_id = %payment_id,
                        error = %e,
                        "refund failed, manual follow-up required"
                    );
                    metrics::counter!("saga_refund_failures_total").increment(1);
                    refund_error = Some(e.to_string());
                }
            }
        }

        let released = self
            .inventory
            .release(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;

        let order_found = match self.orders.get(&order_id).await {
            Ok(mut order) => {
                order.cancel().map_err(|e| StepError::order(step, &e))?;
                self.orders
                    .update(order)
                    .await
                    .map_err(|e| StepError::service(step, &e))?;
                true
            }
            Err(ServiceError::NotFound { .. }) => false,
            Err(e) => return Err(StepError::service(step, &e)),
        };

        tracing::info!(released, refunded = refunded.is_some(), "order cancelled");
        Ok(CancelOutcome {
            order_found,
            refunded,
            refund_error,
            released,
        })
    }
}

/// Hands an order's reserved stock back.
#[derive(Clone)]
pub struct ReleaseInventory {
    inventory: Arc<dyn InventoryService>,
}

impl ReleaseInventory {
    pub fn new(inventory: Arc<dyn InventoryService>) -> Self {
        Self { inventory }
    }

    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute(&self, step: Step, order_id: OrderId) -> Result<usize, StepError> {
        self.inventory
            .release(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))
    }
}
