use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderItem, OrderStatus};

/// An order record. Never deleted; only ever moved to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    /// Always the sum of item subtotals.
    pub total: Money,
    pub status: OrderStatus,
    pub payment_id: Option<PaymentId>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Builds a `Pending` order after validating its input.
    pub fn new(
        id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<Self, OrderError> {
        Self::validate_input(&id, &customer_id, &items)?;

        let now = Utc::now();
        let total = items.iter().map(OrderItem::subtotal).sum();
        Ok(Self {
            id,
            customer_id,
            items,
            total,
            status: OrderStatus::Pending,
            payment_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn validate_input(
        id: &OrderId,
        customer_id: &CustomerId,
        items: &[OrderItem],
    ) -> Result<(), OrderError> {
        if id.is_empty() {
            return Err(OrderError::OrderIdRequired);
        }
        if customer_id.is_empty() {
            return Err(OrderError::CustomerIdRequired);
        }
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        items.iter().try_for_each(OrderItem::validate)
    }

    pub fn recalculate_total(&mut self) {
        self.total = self.items.iter().map(OrderItem::subtotal).sum();
    }

    /// Moves the order along the allow-list. Re-applying the current status
    /// is a no-op.
    pub fn update_status(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status == to {
            return Ok(());
        }
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }

        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        if to == OrderStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Cancelling an already cancelled order succeeds without change.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Cancelled => Ok(()),
            status if !status.can_cancel() => Err(OrderError::CannotCancel(status)),
            _ => self.update_status(OrderStatus::Cancelled),
        }
    }

    /// Marks the order failed. The first recorded reason wins.
    pub fn set_failure(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if self.status == OrderStatus::Failed {
            return Ok(());
        }
        self.update_status(OrderStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn attach_payment(&mut self, payment_id: PaymentId) {
        self.payment_id = Some(payment_id);
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
