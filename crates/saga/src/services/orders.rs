//! Order persistence port and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use domain::Order;
use tokio::sync::RwLock;

use super::{ServiceError, ServiceResult};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `Conflict` if the id is taken.
    async fn create(&self, order: Order) -> ServiceResult<()>;

    /// Fails with `NotFound` if no such order exists.
    async fn get(&self, id: &OrderId) -> ServiceResult<Order>;

    async fn update(&self, order: Order) -> ServiceResult<()>;

    async fn list_by_customer(&self, customer_id: &CustomerId) -> ServiceResult<Vec<Order>>;
}

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_available(&self) -> ServiceResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("order store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: Order) -> ServiceResult<()> {
        self.check_available()?;
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(ServiceError::Conflict {
                entity: "order",
                id: order.id.to_string(),
            });
        }
        orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get(&self, id: &OrderId) -> ServiceResult<Order> {
        self.check_available()?;
        self.orders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("order", id))
    }

    async fn update(&self, order: Order) -> ServiceResult<()> {
        self.check_available()?;
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order;
                Ok(())
            }
            None => Err(ServiceError::not_found("order", &order.id)),
        }
    }

    async fn list_by_customer(&self, customer_id: &CustomerId) -> ServiceResult<Vec<Order>> {
        self.check_available()?;
        let mut orders: Vec<_> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| &o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}
