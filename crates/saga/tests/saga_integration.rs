//! Integration tests for the order fulfillment saga.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId, ProductId};
use domain::{
    Channel, Money, Notification, NotificationError, NotificationType, Order, OrderItem,
    OrderStatus, Payment, PaymentStatus, Product, Reservation,
};
use event_store::InMemoryEventStore;
use saga::services::ServiceResult;
use saga::{
    CancelRequest, ErrorCode, InMemoryInventoryService, InMemoryNotificationRepository,
    InMemoryNotificationSender, InMemoryOrderRepository, InMemoryPaymentGateway,
    InMemoryPaymentRepository, InventoryService, NotificationDispatcher, NotificationSender,
    OrderRepository, PaymentGateway, PaymentRepository, PaymentService, ReservationOutcome,
    RetryPolicies, RetryPolicy, SagaConfig, SagaEngine, SagaError, SagaEvent, SagaHandle,
    SagaJournal, SagaState, SagaStatus, ServiceError, Step, StepStatus,
};
use serde_json::json;
use tokio::sync::Notify;

/// Holds the next call of a wrapped service until the test opens it.
#[derive(Default)]
struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    fn open(&self) {
        self.release.notify_one();
    }
}

struct GatedOrders {
    inner: Arc<InMemoryOrderRepository>,
    gate: Gate,
}

#[async_trait]
impl OrderRepository for GatedOrders {
    async fn create(&self, order: Order) -> ServiceResult<()> {
        self.gate.pass().await;
        self.inner.create(order).await
    }

    async fn get(&self, id: &OrderId) -> ServiceResult<Order> {
        self.inner.get(id).await
    }

    async fn update(&self, order: Order) -> ServiceResult<()> {
        self.inner.update(order).await
    }

    async fn list_by_customer(&self, customer_id: &CustomerId) -> ServiceResult<Vec<Order>> {
        self.inner.list_by_customer(customer_id).await
    }
}

struct GatedInventory {
    inner: Arc<InMemoryInventoryService>,
    gate: Gate,
}

#[async_trait]
impl InventoryService for GatedInventory {
    async fn check_and_reserve(
        &self,
        order_id: &OrderId,
        items: &[OrderItem],
    ) -> ServiceResult<ReservationOutcome> {
        self.gate.pass().await;
        self.inner.check_and_reserve(order_id, items).await
    }

    async fn release(&self, order_id: &OrderId) -> ServiceResult<usize> {
        self.inner.release(order_id).await
    }

    async fn confirm(&self, order_id: &OrderId, items: &[OrderItem]) -> ServiceResult<()> {
        self.inner.confirm(order_id, items).await
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> ServiceResult<usize> {
        self.inner.release_expired(now).await
    }

    async fn product(&self, product_id: &ProductId) -> ServiceResult<Product> {
        self.inner.product(product_id).await
    }

    async fn reservations_for(&self, order_id: &OrderId) -> ServiceResult<Vec<Reservation>> {
        self.inner.reservations_for(order_id).await
    }
}

struct GatedGateway {
    inner: Arc<InMemoryPaymentGateway>,
    gate: Gate,
}

#[async_trait]
impl PaymentGateway for GatedGateway {
    async fn charge(&self, payment: &Payment) -> ServiceResult<String> {
        self.gate.pass().await;
        self.inner.charge(payment).await
    }

    async fn refund(&self, payment: &Payment) -> ServiceResult<()> {
        self.inner.refund(payment).await
    }
}

/// Payment store whose writes can be made to fail once.
#[derive(Default)]
struct FlakyPaymentStore {
    inner: InMemoryPaymentRepository,
    countdown: AtomicU32,
}

impl FlakyPaymentStore {
    /// Fails the `nth` save from now, once.
    fn fail_save(&self, nth: u32) {
        self.countdown.store(nth, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentRepository for FlakyPaymentStore {
    async fn save(&self, payment: Payment) -> ServiceResult<()> {
        let hit = self
            .countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok_and(|previous| previous == 1);
        if hit {
            return Err(ServiceError::Unavailable("payment store write timed out".into()));
        }
        self.inner.save(payment).await
    }

    async fn get(&self, id: &PaymentId) -> ServiceResult<Payment> {
        self.inner.get(id).await
    }

    async fn find_by_order(&self, order_id: &OrderId) -> ServiceResult<Vec<Payment>> {
        self.inner.find_by_order(order_id).await
    }
}

struct GatedSender {
    inner: Arc<InMemoryNotificationSender>,
    gate: Gate,
}

#[async_trait]
impl NotificationSender for GatedSender {
    fn supported_channels(&self) -> Vec<Channel> {
        self.inner.supported_channels()
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.gate.pass().await;
        self.inner.send(notification).await
    }
}

struct TestHarness {
    engine: SagaEngine,
    store: InMemoryEventStore,
    orders: Arc<InMemoryOrderRepository>,
    intake: Arc<GatedOrders>,
    stock: Arc<InMemoryInventoryService>,
    inventory: Arc<GatedInventory>,
    gateway: Arc<InMemoryPaymentGateway>,
    charges: Arc<GatedGateway>,
    ledger: Arc<FlakyPaymentStore>,
    payments: PaymentService,
    sender: Arc<InMemoryNotificationSender>,
    delivery: Arc<GatedSender>,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_config(SagaConfig::for_testing()).await
    }

    async fn with_config(config: SagaConfig) -> Self {
        let store = InMemoryEventStore::new();
        let orders = Arc::new(InMemoryOrderRepository::new());
        let intake = Arc::new(GatedOrders {
            inner: orders.clone(),
            gate: Gate::default(),
        });
        let stock = Arc::new(InMemoryInventoryService::with_products(
            config.reservation_ttl,
            [
                Product::new("SKU-1", "Widget", Money::from_cents(1_000), 50),
                Product::new("SKU-2", "Gadget", Money::from_cents(2_500), 0),
                Product::new("SKU-3", "Gizmo", Money::from_cents(500), 10),
            ],
        ));
        let inventory = Arc::new(GatedInventory {
            inner: stock.clone(),
            gate: Gate::default(),
        });
        let gateway = Arc::new(InMemoryPaymentGateway::new());
        let charges = Arc::new(GatedGateway {
            inner: gateway.clone(),
            gate: Gate::default(),
        });
        let ledger = Arc::new(FlakyPaymentStore::default());
        let payments = PaymentService::new(charges.clone(), ledger.clone());
        let sender = Arc::new(InMemoryNotificationSender::default());
        let delivery = Arc::new(GatedSender {
            inner: sender.clone(),
            gate: Gate::default(),
        });
        let notifications = NotificationDispatcher::new(Arc::new(InMemoryNotificationRepository::new()))
            .with_sender(delivery.clone());

        let services = saga::SagaServices {
            orders: intake.clone(),
            inventory: inventory.clone(),
            payments: payments.clone(),
            notifications,
        };
        let engine = SagaEngine::new(config, services, Arc::new(store.clone()));

        Self {
            engine,
            store,
            orders,
            intake,
            stock,
            inventory,
            gateway,
            charges,
            ledger,
            payments,
            sender,
            delivery,
        }
    }

    async fn start(&self, product: &str, quantity: u32) -> SagaHandle {
        self.engine
            .start_saga(
                CustomerId::new("cust-1"),
                vec![OrderItem::new(product, quantity, Money::from_cents(1_000))],
            )
            .await
            .unwrap()
    }

    async fn product(&self, id: &str) -> Product {
        self.stock.product(&ProductId::new(id)).await.unwrap()
    }

    fn journal(&self) -> SagaJournal {
        SagaJournal::new(Arc::new(self.store.clone()))
    }
}

#[tokio::test]
async fn happy_path_completes_order() {
    let h = TestHarness::new().await;

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);
    assert_eq!(result.message, "Order processed successfully");
    assert!(result.error.is_none());

    let order_id = result.order_id.clone().unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.total, Money::from_cents(5_000));
    assert!(order.completed_at.is_some());

    let payment_id = result.payment_id.clone().unwrap();
    let payment = h.payments.get(&payment_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(order.payment_id, Some(payment_id.clone()));

    let product = h.product("SKU-1").await;
    assert_eq!(product.available, 45);
    assert_eq!(product.reserved, 0);

    let sent = h.sender.sent_for(&order_id).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::OrderConfirmed);
    assert!(sent[0].message.contains(payment_id.as_str()));

    let state = handle.state();
    assert_eq!(state.status(), SagaStatus::Completed);
    assert_eq!(state.step_history().len(), 5);
    assert!(
        state
            .step_history()
            .iter()
            .all(|s| s.status == StepStatus::Completed)
    );
    assert_eq!(handle.progress().current_step_index, 5);
    assert!((handle.progress().percent - 100.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn successful_check_reserves_requested_quantity() {
    let h = TestHarness::new().await;
    h.charges.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.charges.gate.wait_entered().await;

    let product = h.product("SKU-1").await;
    assert_eq!(product.reserved, 5);
    assert_eq!(product.available, 50);

    h.charges.gate.open();
    assert!(handle.outcome().await.unwrap().success);
}

#[tokio::test]
async fn out_of_stock_fails_without_reservation() {
    let h = TestHarness::new().await;

    let handle = h.start("SKU-2", 1).await;
    let result = handle.outcome().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::InventoryUnavailable));
    assert!(result.message.contains("SKU-2"));

    let order_id = result.order_id.unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(h.stock.reservations_for(&order_id).await.unwrap().is_empty());
    assert!(h.payments.payments_for_order(&order_id).await.unwrap().is_empty());

    let sent = h.sender.sent_for(&order_id).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::OrderFailed);
    assert!(sent[0].message.contains("SKU-2"));
}

#[tokio::test]
async fn declined_payment_releases_reservation_without_retry() {
    let h = TestHarness::new().await;
    h.gateway.set_decline(true);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::PaymentFailed));
    assert_eq!(h.gateway.charge_attempts(), 1);

    let order_id = result.order_id.unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Failed);

    let product = h.product("SKU-1").await;
    assert_eq!(product.reserved, 0);
    assert_eq!(product.available, 50);

    let payments = h.payments.payments_for_order(&order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);

    let sent = h.sender.sent_for(&order_id).await;
    assert_eq!(sent[0].kind, NotificationType::PaymentFailed);
    assert_eq!(handle.state().retry_count(), 0);
}

#[tokio::test]
async fn cancel_during_inventory_check_releases_new_reservation() {
    let h = TestHarness::new().await;
    h.inventory.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.inventory.gate.wait_entered().await;
    handle
        .cancel(CancelRequest::new("changed my mind", "customer"))
        .unwrap();
    h.inventory.gate.open();

    let result = handle.outcome().await.unwrap();
    assert!(!result.success);
    assert_eq!(result.status, OrderStatus::Cancelled);
    assert_eq!(result.message, "Order was cancelled");
    assert_eq!(result.error, Some(ErrorCode::OrderCancelled));

    let order_id = result.order_id.unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let product = h.product("SKU-1").await;
    assert_eq!(product.reserved, 0);
    assert_eq!(product.available, 50);
    assert!(h.payments.payments_for_order(&order_id).await.unwrap().is_empty());

    let state = handle.state();
    assert!(state.is_cancelled());
    assert_eq!(state.cancellation_reason(), Some("changed my mind"));
    let check = state
        .step_history()
        .iter()
        .find(|s| s.step == Step::CheckInventory)
        .unwrap();
    assert_eq!(check.status, StepStatus::Cancelled);

    let sent = h.sender.sent_for(&order_id).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::OrderCancelled);
}

#[tokio::test]
async fn cancel_during_order_creation_cancels_created_order() {
    let h = TestHarness::new().await;
    h.intake.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.intake.gate.wait_entered().await;
    handle
        .cancel(CancelRequest::new("ordered by mistake", "customer"))
        .unwrap();
    h.intake.gate.open();

    let result = handle.outcome().await.unwrap();
    assert_eq!(result.status, OrderStatus::Cancelled);
    assert_eq!(result.error, Some(ErrorCode::OrderCancelled));

    // the activity finished creating the order after the signal won
    let state = handle.state();
    let order_id = state.planned_order_id().cloned().unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    assert!(h.stock.reservations_for(&order_id).await.unwrap().is_empty());
    let product = h.product("SKU-1").await;
    assert_eq!(product.reserved, 0);
    assert_eq!(product.available, 50);
    assert_eq!(h.gateway.charge_attempts(), 0);

    let create = &state.step_history()[0];
    assert_eq!(create.step, Step::CreateOrder);
    assert_eq!(create.status, StepStatus::Cancelled);

    let sent = h.sender.sent_for(&order_id).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationType::OrderCancelled);
}

#[tokio::test]
async fn cancel_during_retry_backoff_stops_retrying() {
    let mut retry = RetryPolicies::uniform(RetryPolicy::immediate(3));
    retry.process_payment = RetryPolicy::immediate(3)
        .with_initial_interval(Duration::from_secs(30))
        .with_max_interval(Duration::from_secs(30));
    let h = TestHarness::with_config(SagaConfig::for_testing().with_retry(retry)).await;
    h.gateway.fail_next_charges(1);

    let handle = h.start("SKU-1", 5).await;
    handle
        .wait_for_state(|s| s.retry_count() == 1)
        .await
        .unwrap();
    handle
        .cancel(CancelRequest::new("taking too long", "customer"))
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .expect("cancellation should cut the backoff short")
        .unwrap();
    assert_eq!(result.status, OrderStatus::Cancelled);
    assert_eq!(h.gateway.charge_attempts(), 1);

    let order_id = result.order_id.unwrap();
    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(
        h.payments
            .completed_for_order(&order_id)
            .await
            .unwrap()
            .is_none()
    );

    let product = h.product("SKU-1").await;
    assert_eq!(product.reserved, 0);
    assert_eq!(product.available, 50);

    let payment = handle
        .step_history()
        .into_iter()
        .find(|s| s.step == Step::ProcessPayment)
        .unwrap();
    assert_eq!(payment.status, StepStatus::Cancelled);
    assert_eq!(payment.retry_count, 1);
}

#[tokio::test]
async fn confirm_failure_after_payment_retries_then_fails() {
    let h = TestHarness::new().await;
    h.stock.set_fail_on_confirm(true);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::InternalError));
    assert!(result.message.contains("Failed to confirm reservation"));

    // the charge is made once and never rolled back
    assert_eq!(h.gateway.charge_attempts(), 1);
    let order_id = result.order_id.unwrap();
    let payment = h
        .payments
        .completed_for_order(&order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let state = handle.state();
    assert_eq!(state.retry_count(), 2);
    let attempt = state
        .step_history()
        .iter()
        .find(|s| s.step == Step::ProcessPayment)
        .unwrap();
    assert_eq!(attempt.status, StepStatus::Failed);
    assert_eq!(attempt.retry_count, 2);

    // stock is left for the expiry sweep
    assert_eq!(h.product("SKU-1").await.reserved, 5);
}

#[tokio::test]
async fn cancel_before_first_step_creates_nothing() {
    let h = TestHarness::new().await;

    let handle = h.start("SKU-1", 5).await;
    handle.cancel(CancelRequest::default()).unwrap();
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Cancelled);
    assert!(result.order_id.is_none());
    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(h.gateway.charge_attempts(), 0);
    assert!(h.sender.sent().await.is_empty());
}

#[tokio::test]
async fn cancel_during_payment_refunds_charge() {
    let h = TestHarness::new().await;
    h.charges.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.charges.gate.wait_entered().await;
    handle
        .signal(
            "cancel-order",
            json!({"reason": "found it cheaper", "requested_by": "support"}),
        )
        .unwrap();
    h.charges.gate.open();

    let result = handle.outcome().await.unwrap();
    assert_eq!(result.status, OrderStatus::Cancelled);

    let order_id = result.order_id.unwrap();
    let payments = h.payments.payments_for_order(&order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.refund_count(), 1);
    assert!(h.stock.reservations_for(&order_id).await.unwrap().is_empty());

    let order = h.orders.get(&order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(handle.state().cancelled_by(), Some("support"));
}

#[tokio::test]
async fn refund_failure_still_cancels() {
    let h = TestHarness::new().await;
    h.gateway.set_fail_refunds(true);
    h.charges.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.charges.gate.wait_entered().await;
    handle.cancel(CancelRequest::default()).unwrap();
    h.charges.gate.open();

    let result = handle.outcome().await.unwrap();
    assert_eq!(result.status, OrderStatus::Cancelled);

    let order_id = result.order_id.unwrap();
    let payment = h
        .payments
        .completed_for_order(&order_id)
        .await
        .unwrap();
    assert!(payment.is_some());
    assert_eq!(h.orders.get(&order_id).await.unwrap().status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn cancel_rejected_once_notification_started() {
    let h = TestHarness::new().await;
    h.delivery.gate.arm();

    let handle = h.start("SKU-1", 5).await;
    h.delivery.gate.wait_entered().await;

    let rejected = handle.cancel(CancelRequest::default());
    assert!(matches!(rejected, Err(SagaError::CancellationRejected(_))));

    h.delivery.gate.open();
    let result = handle.outcome().await.unwrap();
    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);
}

#[tokio::test]
async fn invalid_input_fails_at_create_order() {
    let h = TestHarness::new().await;

    let handle = h
        .engine
        .start_saga(CustomerId::new("cust-1"), vec![])
        .await
        .unwrap();
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::ValidationError));
    assert!(result.order_id.is_none());
    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(handle.state().retry_count(), 0);
}

#[tokio::test]
async fn transient_gateway_errors_are_retried() {
    let h = TestHarness::new().await;
    h.gateway.fail_next_charges(2);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(h.gateway.charge_attempts(), 3);
    assert_eq!(handle.state().retry_count(), 2);

    let payments = h
        .payments
        .payments_for_order(&result.order_id.unwrap())
        .await
        .unwrap();
    assert_eq!(payments.len(), 3);
    assert_eq!(
        payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Completed)
            .count(),
        1
    );
}

#[tokio::test]
async fn exhausted_retries_fail_and_release() {
    let h = TestHarness::new().await;
    h.gateway.fail_next_charges(3);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert_eq!(result.status, OrderStatus::Failed);
    assert_eq!(result.error, Some(ErrorCode::PaymentFailed));
    assert_eq!(h.gateway.charge_attempts(), 3);
    assert_eq!(h.product("SKU-1").await.reserved, 0);
}

#[tokio::test]
async fn notification_failure_does_not_fail_saga() {
    let h = TestHarness::new().await;
    h.sender.fail_next_sends(3);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);

    let history = handle.step_history();
    let notify = history
        .iter()
        .find(|s| s.step == Step::SendNotification)
        .unwrap();
    assert_eq!(notify.status, StepStatus::Abandoned);
    assert!(notify.error.is_some());
    assert_eq!(h.sender.attempts(), 3);
    assert_eq!(
        history
            .iter()
            .filter(|s| s.step == Step::SendNotification)
            .count(),
        1
    );
}

#[tokio::test]
async fn unreachable_channel_abandons_notification_once() {
    let h = TestHarness::new().await;
    h.sender.fail_next_sends(1_000);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);
    assert_eq!(h.sender.attempts(), 3);

    let history = handle.step_history();
    let notifications: Vec<_> = history
        .iter()
        .filter(|s| s.step == Step::SendNotification)
        .collect();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, StepStatus::Abandoned);
    assert_eq!(notifications[0].retry_count, 2);

    let last = history.last().unwrap();
    assert_eq!(last.step, Step::Complete);
    assert_eq!(last.status, StepStatus::Completed);

    let order = h.orders.get(&result.order_id.unwrap()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn in_doubt_payment_is_resumed_without_second_charge() {
    let h = TestHarness::new().await;
    // the pending record saves, the completed one does not
    h.ledger.fail_save(2);

    let handle = h.start("SKU-1", 5).await;
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, OrderStatus::Completed);
    assert_eq!(handle.state().retry_count(), 1);
    assert_eq!(h.gateway.charge_attempts(), 2);
    assert_eq!(h.gateway.captured_count().await, 1);
    assert_eq!(h.gateway.refund_count(), 0);

    let order_id = result.order_id.unwrap();
    let payments = h.payments.payments_for_order(&order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert_eq!(payments[0].transaction_id.as_deref(), Some("TXN-000001"));
    assert_eq!(result.payment_id, Some(payments[0].id.clone()));

    let product = h.product("SKU-1").await;
    assert_eq!(product.available, 45);
    assert_eq!(product.reserved, 0);
}

#[tokio::test]
async fn named_queries_and_signals() {
    let h = TestHarness::new().await;

    let handle = h.start("SKU-1", 1).await;
    handle.outcome().await.unwrap();

    assert_eq!(handle.query("order-status").unwrap(), json!("completed"));

    let progress = handle.query("progress").unwrap();
    assert_eq!(progress["current_step_index"], 5);
    assert_eq!(progress["total_steps"], 5);
    assert_eq!(progress["is_completed"], true);

    let history = handle.query("step-history").unwrap();
    assert_eq!(history.as_array().map(Vec::len), Some(5));
    assert_eq!(history[0]["step"], "create_order");

    let state = handle.query("workflow-state").unwrap();
    assert_eq!(state["status"], "completed");

    assert!(matches!(
        handle.query("balance"),
        Err(SagaError::UnknownQuery(_))
    ));
    assert!(matches!(
        handle.signal("pause", serde_json::Value::Null),
        Err(SagaError::UnknownSignal(_))
    ));
    assert!(matches!(
        handle.signal("cancel-order", serde_json::Value::Null),
        Err(SagaError::AlreadyFinished(_))
    ));

    let by_id = h
        .engine
        .query(handle.saga_id(), "order-status")
        .await
        .unwrap();
    assert_eq!(by_id, json!("completed"));
}

#[tokio::test]
async fn journal_replays_to_same_state() {
    let h = TestHarness::new().await;

    let handle = h.start("SKU-1", 2).await;
    handle.outcome().await.unwrap();

    let replayed = h.journal().load(handle.saga_id()).await.unwrap().unwrap();
    let live = handle.state();
    assert_eq!(replayed.status(), SagaStatus::Completed);
    assert_eq!(replayed.order_id(), live.order_id());
    assert_eq!(replayed.payment_id(), live.payment_id());
    assert_eq!(replayed.step_history(), live.step_history());
}

/// Journals a saga that stopped after creating its order.
async fn interrupted_saga(h: &TestHarness) -> SagaState {
    let journal = h.journal();
    let saga_id = common::AggregateId::new();
    let order_id = OrderId::new("order-interrupted");
    let items = vec![OrderItem::new("SKU-3", 2, Money::from_cents(500))];

    let mut state = SagaState::default();
    journal
        .record(
            &mut state,
            SagaEvent::saga_started(saga_id, order_id.clone(), CustomerId::new("cust-9"), items.clone()),
        )
        .await
        .unwrap();
    journal
        .record(&mut state, SagaEvent::step_started(Step::CreateOrder))
        .await
        .unwrap();
    journal
        .record(&mut state, SagaEvent::order_created(order_id.clone()))
        .await
        .unwrap();
    journal
        .record(&mut state, SagaEvent::step_started(Step::CheckInventory))
        .await
        .unwrap();

    let order = domain::Order::new(order_id, CustomerId::new("cust-9"), items).unwrap();
    h.orders.create(order).await.unwrap();
    state
}

#[tokio::test]
async fn resume_continues_from_last_committed_step() {
    let h = TestHarness::new().await;
    let state = interrupted_saga(&h).await;
    let saga_id = state.saga_id().unwrap();

    let handle = h.engine.resume(saga_id).await.unwrap();
    let result = handle.outcome().await.unwrap();

    assert!(result.success);
    assert_eq!(h.orders.order_count().await, 1);
    assert_eq!(h.product("SKU-3").await.available, 8);

    let history = handle.step_history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].step, Step::CreateOrder);
    assert_eq!(history[1].step, Step::CheckInventory);

    let finished = h.engine.resume(saga_id).await.unwrap();
    assert_eq!(finished.saga_id(), saga_id);
    assert!(finished.state().is_terminal());
}

#[tokio::test]
async fn recover_all_resumes_unfinished_sagas() {
    let h = TestHarness::new().await;
    let interrupted = interrupted_saga(&h).await;

    let finished = h.start("SKU-1", 1).await;
    finished.outcome().await.unwrap();

    let resumed = h.engine.recover_all().await.unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(Some(resumed[0].saga_id()), interrupted.saga_id());
    assert!(resumed[0].outcome().await.unwrap().success);
}

#[tokio::test]
async fn running_saga_cannot_be_resumed_twice() {
    let h = TestHarness::new().await;
    h.inventory.gate.arm();

    let handle = h.start("SKU-1", 1).await;
    h.inventory.gate.wait_entered().await;

    assert!(matches!(
        h.engine.resume(handle.saga_id()).await,
        Err(SagaError::AlreadyRunning(_))
    ));
    assert_eq!(h.engine.running_count().await, 1);

    h.inventory.gate.open();
    handle.outcome().await.unwrap();

    assert!(matches!(
        h.engine.handle(common::AggregateId::new()).await,
        Err(SagaError::NotFound(_))
    ));
}

#[tokio::test]
async fn concurrent_sagas_never_oversell() {
    let h = TestHarness::new().await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        handles.push(h.start("SKU-3", 3).await);
    }

    let mut completed = 0;
    for handle in &handles {
        let result = handle.outcome().await.unwrap();
        if result.success {
            completed += 1;
        } else {
            assert_eq!(result.error, Some(ErrorCode::InventoryUnavailable));
        }
    }

    assert_eq!(completed, 3);
    let product = h.product("SKU-3").await;
    assert_eq!(product.available, 1);
    assert_eq!(product.reserved, 0);
}

#[tokio::test]
async fn progress_is_visible_while_running() {
    let h = TestHarness::new().await;
    h.charges.gate.arm();

    let handle = h.start("SKU-1", 1).await;
    h.charges.gate.wait_entered().await;

    let state = handle
        .wait_for_state(|s| s.current_step() == Some(Step::ProcessPayment))
        .await
        .unwrap();
    let progress = state.progress();
    assert_eq!(progress.current_step_index, 3);
    assert!((progress.percent - 60.0).abs() < f64::EPSILON);
    assert!(!progress.is_completed);
    assert_eq!(handle.status(), OrderStatus::Validating);

    h.charges.gate.open();
    handle.outcome().await.unwrap();
}
