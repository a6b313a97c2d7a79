use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use super::PaymentError;
use crate::order::Money;

/// ```text
/// Pending ──► Completed ──► Refunded
///    │
///    └──────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub method: String,
}

impl ChargeRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.order_id.is_empty() {
            return Err(PaymentError::Validation("order_id is required".into()));
        }
        if self.customer_id.is_empty() {
            return Err(PaymentError::Validation("customer_id is required".into()));
        }
        if !self.amount.is_positive() {
            return Err(PaymentError::Validation(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::Validation("currency is required".into()));
        }
        Ok(())
    }
}

/// A charge against a customer for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(request: &ChargeRequest) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::generate(),
            order_id: request.order_id.clone(),
            customer_id: request.customer_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            method: request.method.clone(),
            status: PaymentStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    pub fn complete(&mut self, transaction_id: impl Into<String>) -> Result<(), PaymentError> {
        self.transition(PaymentStatus::Completed)?;
        self.transaction_id = Some(transaction_id.into());
        self.processed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        self.transition(PaymentStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.processed_at = Some(self.updated_at);
        Ok(())
    }

    /// Only a completed payment can be refunded.
    pub fn refund(&mut self) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Completed {
            return Err(PaymentError::CannotRefund(self.status));
        }
        self.transition(PaymentStatus::Refunded)
    }

    /// The gateway took the money at some point. Such a payment blocks
    /// another charge for the order.
    pub fn is_captured(&self) -> bool {
        matches!(self.status, PaymentStatus::Completed | PaymentStatus::Refunded)
    }

    fn transition(&mut self, to: PaymentStatus) -> Result<(), PaymentError> {
        use PaymentStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Completed | Failed) | (Completed, Refunded)
        );
        if !allowed {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: i64) -> ChargeRequest {
        ChargeRequest {
            order_id: OrderId::new("ord-1"),
            customer_id: CustomerId::new("cust-1"),
            amount: Money::from_cents(amount),
            currency: "USD".into(),
            method: "card".into(),
        }
    }

    #[test]
    fn non_positive_amount_is_invalid() {
        assert!(matches!(
            request(0).validate(),
            Err(PaymentError::Validation(_))
        ));
        assert!(matches!(
            request(-5).validate(),
            Err(PaymentError::Validation(_))
        ));
        assert!(request(1).validate().is_ok());
    }

    #[test]
    fn missing_identifiers_are_invalid() {
        let mut req = request(100);
        req.customer_id = CustomerId::new("");
        assert!(matches!(req.validate(), Err(PaymentError::Validation(_))));
    }

    #[test]
    fn complete_then_refund() {
        let mut payment = Payment::new(&request(100));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(!payment.is_captured());

        payment.complete("TXN-1").unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.transaction_id.as_deref(), Some("TXN-1"));
        assert!(payment.processed_at.is_some());

        payment.refund().unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert!(payment.is_captured());
    }

    #[test]
    fn refund_requires_completed() {
        let mut payment = Payment::new(&request(100));
        assert_eq!(
            payment.refund().unwrap_err(),
            PaymentError::CannotRefund(PaymentStatus::Pending)
        );

        payment.fail("declined").unwrap();
        assert_eq!(
            payment.refund().unwrap_err(),
            PaymentError::CannotRefund(PaymentStatus::Failed)
        );
        assert!(!payment.is_captured());
    }

    #[test]
    fn status_is_forward_only() {
        let mut payment = Payment::new(&request(100));
        payment.complete("TXN-1").unwrap();
        assert!(matches!(
            payment.fail("late"),
            Err(PaymentError::InvalidTransition { .. })
        ));
        assert!(matches!(
            payment.complete("TXN-2"),
            Err(PaymentError::InvalidTransition { .. })
        ));
    }
}
