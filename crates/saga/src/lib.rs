//! Saga orchestration for order fulfillment.
//!
//! The order fulfillment saga runs five steps in a fixed order:
//! 1. Create the order
//! 2. Check and reserve inventory
//! 3. Process payment and sell the reserved stock
//! 4. Notify the customer (best effort)
//! 5. Complete the order
//!
//! A failed step sends the saga down the failure path: stock is released,
//! the customer is notified and the order is marked failed. A `cancel-order`
//! signal accepted before notification sends it down the cancellation path:
//! the payment is refunded, stock is released and the order is cancelled.
//!
//! Every state change is journaled to an [`event_store::EventStore`] before
//! it is visible, so an interrupted saga can be resumed from its journal.

pub mod activities;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handle;
pub mod journal;
pub mod order_fulfillment;
pub mod policy;
pub mod services;
pub mod state;
pub mod sweeper;

pub use activities::{Activities, SagaServices};
pub use config::SagaConfig;
pub use coordinator::{SagaCoordinator, WorkflowResult};
pub use error::{ErrorCode, ErrorKind, SagaError, StepError};
pub use events::SagaEvent;
pub use handle::{CancelRequest, SagaEngine, SagaHandle};
pub use journal::SagaJournal;
pub use order_fulfillment::Step;
pub use policy::{RetryPolicies, RetryPolicy};
pub use services::{
    InMemoryInventoryService, InMemoryNotificationRepository, InMemoryNotificationSender,
    InMemoryOrderRepository, InMemoryPaymentGateway, InMemoryPaymentRepository,
    InventoryService, NotificationDispatcher, NotificationRepository, NotificationRequest,
    NotificationSender, OrderRepository, PaymentGateway, PaymentRepository, PaymentService,
    ReservationOutcome, ServiceError,
};
pub use state::{Progress, SagaState, SagaStatus, StepExecution, StepStatus};
pub use sweeper::ReservationSweeper;
