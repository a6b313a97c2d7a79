//! Payment gateway and repository ports, the service that combines them,
//! and in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use common::{OrderId, PaymentId};
use domain::{ChargeRequest, Payment, PaymentError, PaymentStatus};
use tokio::sync::RwLock;

use super::{ServiceError, ServiceResult};

/// Abstract charge/refund contract of an external payment provider.
///
/// Implementations report a business refusal as `ServiceError::Declined`
/// and a network or provider outage, where nothing was charged, as
/// `ServiceError::Unavailable`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges the payment and returns the provider's transaction reference.
    ///
    /// The payment id is the idempotency key: charging a payment the
    /// provider already captured returns the original reference and moves
    /// no money.
    async fn charge(&self, payment: &Payment) -> ServiceResult<String>;

    async fn refund(&self, payment: &Payment) -> ServiceResult<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts or replaces a payment record.
    async fn save(&self, payment: Payment) -> ServiceResult<()>;

    async fn get(&self, id: &PaymentId) -> ServiceResult<Payment>;

    async fn find_by_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Payment>>;
}

/// Records payments and drives them through the gateway.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    repository: Arc<dyn PaymentRepository>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, repository: Arc<dyn PaymentRepository>) -> Self {
        Self {
            gateway,
            repository,
        }
    }

    /// Charges an order.
    ///
    /// The payment is stored as `Pending` before the gateway is called and
    /// ends `Completed` or `Failed`. A `Pending` payment left by an
    /// interrupted attempt is in doubt: it is charged again under its own
    /// id, which the gateway resolves to the original capture if there was
    /// one. An order whose payment was captured cannot be charged again.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    pub async fn process(&self, request: ChargeRequest) -> ServiceResult<Payment> {
        request.validate()?;

        let existing = self.repository.find_by_order(&request.order_id).await?;
        if existing.iter().any(Payment::is_captured) {
            return Err(PaymentError::Duplicate(request.order_id.clone()).into());
        }

        let in_doubt = existing
            .into_iter()
            .find(|p| p.status == PaymentStatus::Pending);
        let mut payment = match in_doubt {
            Some(payment) => {
                tracing::warn!(payment_id = %payment.id, "resuming in-doubt payment");
                payment
            }
            None => {
                let payment = Payment::new(&request);
                self.repository.save(payment.clone()).await?;
                payment
            }
        };

        match self.gateway.charge(&payment).await {
            Ok(transaction_id) => {
                payment.complete(transaction_id)?;
                self.repository.save(payment.clone()).await?;
                tracing::info!(payment_id = %payment.id, "payment completed");
                Ok(payment)
            }
            Err(err) => {
                payment.fail(err.to_string())?;
                self.repository.save(payment).await?;
                tracing::warn!(error = %err, "payment failed");
                Err(err)
            }
        }
    }

    /// Refunds a completed payment.
    #[tracing::instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn refund(&self, payment_id: &PaymentId) -> ServiceResult<Payment> {
        let mut payment = self.repository.get(payment_id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(PaymentError::CannotRefund(payment.status).into());
        }

        self.gateway.refund(&payment).await?;
        payment.refund()?;
        self.repository.save(payment.clone()).await?;
        tracing::info!("payment refunded");
        Ok(payment)
    }

    pub async fn get(&self, payment_id: &PaymentId) -> ServiceResult<Payment> {
        self.repository.get(payment_id).await
    }

    pub async fn payments_for_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Payment>> {
        self.repository.find_by_order(order_id).await
    }

    /// The completed payment of an order, if any.
    pub async fn completed_for_order(&self, order_id: &OrderId) -> ServiceResult<Option<Payment>> {
        Ok(self
            .repository
            .find_by_order(order_id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentStatus::Completed))
    }
}

/// Gateway simulator with failure switches.
#[derive(Debug, Default)]
pub struct InMemoryPaymentGateway {
    decline: AtomicBool,
    transient_failures: AtomicU32,
    fail_refunds: AtomicBool,
    charges: AtomicU32,
    refunds: AtomicU32,
    captured: RwLock<HashMap<PaymentId, String>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every charge until reset.
    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    /// Fails the next `count` charges as if the provider were unreachable.
    pub fn fail_next_charges(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Number of charge attempts, successful or not.
    pub fn charge_attempts(&self) -> u32 {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> u32 {
        self.refunds.load(Ordering::SeqCst)
    }

    /// Number of distinct payments the gateway took money for.
    pub async fn captured_count(&self) -> usize {
        self.captured.read().await.len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, payment: &Payment) -> ServiceResult<String> {
        let attempt = self.charges.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(reference) = self.captured.read().await.get(&payment.id) {
            return Ok(reference.clone());
        }

        let pending_failures = self.transient_failures.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.transient_failures
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(ServiceError::Unavailable("payment gateway timeout".into()));
        }
        if self.decline.load(Ordering::SeqCst) {
            return Err(ServiceError::Declined(format!(
                "card declined for order {}",
                payment.order_id
            )));
        }

        let reference = format!("TXN-{attempt:06}");
        self.captured
            .write()
            .await
            .insert(payment.id.clone(), reference.clone());
        Ok(reference)
    }

    async fn refund(&self, payment: &Payment) -> ServiceResult<()> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable(format!(
                "refund of {} rejected by gateway",
                payment.id
            )));
        }
        self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn save(&self, payment: Payment) -> ServiceResult<()> {
        self.payments
            .write()
            .await
            .insert(payment.id.clone(), payment);
        Ok(())
    }

    async fn get(&self, id: &PaymentId) -> ServiceResult<Payment> {
        self.payments
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.clone()).into())
    }

    async fn find_by_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Payment>> {
        let mut payments: Vec<_> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| &p.order_id == order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}
