use std::sync::Arc;

use common::OrderId;
use domain::{ChargeRequest, OrderStatus, Payment};

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::{InventoryService, OrderRepository, PaymentService};

/// Charges the order, then sells its reserved stock.
#[derive(Clone)]
pub struct ProcessPayment {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryService>,
    payments: PaymentService,
    currency: String,
    method: String,
}

impl ProcessPayment {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryService>,
        payments: PaymentService,
        currency: String,
        method: String,
    ) -> Self {
        Self {
            orders,
            inventory,
            payments,
            currency,
            method,
        }
    }

    /// A completed payment from an earlier attempt is reused rather than
    /// charged again. Failing to confirm the reservation after the charge
    /// is an `Internal` error; the payment stays completed.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn execute(&self, order_id: OrderId) -> Result<Payment, StepError> {
        let step = Step::ProcessPayment;
        let mut order = self
            .orders
            .get(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;

        let existing = self
            .payments
            .completed_for_order(&order_id)
            .await
            .map_err(|e| StepError::service(step, &e))?;

        let payment = match existing {
            Some(payment) => payment,
            None => {
                if order.status != OrderStatus::Payment {
                    order
                        .update_status(OrderStatus::Payment)
                        .map_err(|e| StepError::order(step, &e))?;
                    self.orders
                        .update(order.clone())
                        .await
                        .map_err(|e| StepError::service(step, &e))?;
                }

                let request = ChargeRequest {
                    order_id: order_id.clone(),
                    customer_id: order.customer_id.clone(),
                    amount: order.total,
                    currency: self.currency.clone(),
                    method: self.method.clone(),
                };
                self.payments
                    .process(request)
                    .await
                    .map_err(|e| StepError::service(step, &e))?
            }
        };

        if let Err(e) = self.inventory.confirm(&order_id, &order.items).await {
            tracing::error!(
                payment_id = %payment.id,
                error = %e,
                "payment succeeded but reservation confirm failed"
            );
            return Err(StepError::internal(
                step,
                format!("Failed to confirm reservation after successful payment: {e}"),
            ));
        }

        if order.payment_id.as_ref() != Some(&payment.id) {
            order.attach_payment(payment.id.clone());
            self.orders
                .update(order)
                .await
                .map_err(|e| StepError::service(step, &e))?;
        }

        Ok(payment)
    }
}
