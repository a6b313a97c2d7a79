use std::sync::Arc;

use common::{CustomerId, OrderId};
use domain::{Order, OrderItem};

use crate::error::StepError;
use crate::order_fulfillment::Step;
use crate::services::{OrderRepository, ServiceError};

/// Persists the order under the id planned at saga start.
#[derive(Clone)]
pub struct CreateOrder {
    orders: Arc<dyn OrderRepository>,
}

impl CreateOrder {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Returns the stored order if a previous attempt already created it.
    #[tracing::instrument(skip(self, items), fields(order_id = %order_id, customer_id = %customer_id))]
    pub async fn execute(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<Order, StepError> {
        let step = Step::CreateOrder;
        let order = Order::new(order_id, customer_id, items)
            .map_err(|e| StepError::order(step, &e))?;

        match self.orders.get(&order.id).await {
            Ok(existing) => return Ok(existing),
            Err(ServiceError::NotFound { .. }) => {}
            Err(e) => return Err(StepError::service(step, &e)),
        }

        match self.orders.create(order.clone()).await {
            Ok(()) => {
                tracing::info!(total = %order.total, "order created");
                Ok(order)
            }
            Err(ServiceError::Conflict { .. }) => self
                .orders
                .get(&order.id)
                .await
                .map_err(|e| StepError::service(step, &e)),
            Err(e) => Err(StepError::service(step, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorKind};
    use crate::services::InMemoryOrderRepository;
    use domain::{Money, OrderStatus};

    fn items() -> Vec<OrderItem> {
        vec![
            OrderItem::new("SKU-1", 2, Money::from_cents(1_000)),
            OrderItem::new("SKU-2", 1, Money::from_cents(250)),
        ]
    }

    #[tokio::test]
    async fn creates_pending_order_with_total() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let activity = CreateOrder::new(repo.clone());

        let order = activity
            .execute(OrderId::new("o-1"), CustomerId::new("c-1"), items())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, Money::from_cents(2_250));
        assert_eq!(repo.order_count().await, 1);
    }

    #[tokio::test]
    async fn second_execution_returns_existing_order() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let activity = CreateOrder::new(repo.clone());

        let first = activity
            .execute(OrderId::new("o-1"), CustomerId::new("c-1"), items())
            .await
            .unwrap();
        let second = activity
            .execute(OrderId::new("o-1"), CustomerId::new("c-1"), items())
            .await
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(repo.order_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_input_is_a_validation_error() {
        let activity = CreateOrder::new(Arc::new(InMemoryOrderRepository::new()));

        let err = activity
            .execute(OrderId::new("o-1"), CustomerId::new(""), items())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.step, Step::CreateOrder);
    }

    #[tokio::test]
    async fn unavailable_store_is_transient() {
        let repo = Arc::new(InMemoryOrderRepository::new());
        repo.set_unavailable(true);
        let activity = CreateOrder::new(repo);

        let err = activity
            .execute(OrderId::new("o-1"), CustomerId::new("c-1"), items())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
