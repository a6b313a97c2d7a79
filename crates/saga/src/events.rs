//! Saga journal events.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId, OrderId, PaymentId};
use domain::{DomainEvent, OrderItem};
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::order_fulfillment::Step;

/// Every state change of a saga run, in the order it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    SagaStarted(SagaStartedData),
    StepStarted(StepStartedData),
    StepRetried(StepRetriedData),
    StepCompleted(StepCompletedData),
    /// The step failed for good and the saga takes the failure path.
    StepFailed(StepFailedData),
    /// A best-effort step gave up without affecting the outcome.
    StepAbandoned(StepFailedData),
    CancellationRequested(CancellationData),
    CancellationRejected(CancellationRejectedData),
    CompensationExecuted(CompensationData),
    SagaCompleted(SagaCompletedData),
    SagaFailed(SagaFailedData),
    SagaCancelled(SagaCancelledData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepRetried(_) => "StepRetried",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::StepAbandoned(_) => "StepAbandoned",
            SagaEvent::CancellationRequested(_) => "CancellationRequested",
            SagaEvent::CancellationRejected(_) => "CancellationRejected",
            SagaEvent::CompensationExecuted(_) => "CompensationExecuted",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
            SagaEvent::SagaCancelled(_) => "SagaCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: AggregateId,
    /// Id the order record will be created under.
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStartedData {
    pub step: Step,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRetriedData {
    pub step: Step,
    /// The attempt that failed, starting at 1.
    pub attempt: u32,
    pub error: StepError,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step: Step,
    pub order_id: Option<OrderId>,
    pub payment_id: Option<PaymentId>,
    pub transaction_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step: Step,
    pub error: StepError,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationData {
    pub reason: String,
    pub requested_by: String,
    /// Step that was running when the request was honored.
    pub step: Option<Step>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRejectedData {
    pub reason: String,
    pub step: Option<Step>,
    pub rejected_at: DateTime<Utc>,
}

/// Compensating actions a saga can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationAction {
    ReleaseInventory,
    CancelOrder,
    FailOrder,
    NotifyCustomer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationData {
    pub action: CompensationAction,
    pub succeeded: bool,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub order_id: OrderId,
    pub payment_id: Option<PaymentId>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub error: StepError,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCancelledData {
    pub cancelled_at: DateTime<Utc>,
}

impl SagaEvent {
    pub fn saga_started(
        saga_id: AggregateId,
        order_id: OrderId,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            order_id,
            customer_id,
            items,
            started_at: Utc::now(),
        })
    }

    pub fn step_started(step: Step) -> Self {
        SagaEvent::StepStarted(StepStartedData {
            step,
            started_at: Utc::now(),
        })
    }

    pub fn step_retried(attempt: u32, error: StepError, delay: std::time::Duration) -> Self {
        SagaEvent::StepRetried(StepRetriedData {
            step: error.step,
            attempt,
            error,
            delay_ms: delay.as_millis() as u64,
        })
    }

    pub fn step_completed(step: Step) -> Self {
        SagaEvent::StepCompleted(Self::completed_data(step))
    }

    pub fn order_created(order_id: OrderId) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            order_id: Some(order_id),
            ..Self::completed_data(Step::CreateOrder)
        })
    }

    pub fn payment_processed(payment_id: PaymentId, transaction_id: Option<String>) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            payment_id: Some(payment_id),
            transaction_id,
            ..Self::completed_data(Step::ProcessPayment)
        })
    }

    pub fn step_failed(error: StepError, attempts: u32) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step: error.step,
            error,
            attempts,
            failed_at: Utc::now(),
        })
    }

    pub fn step_abandoned(error: StepError, attempts: u32) -> Self {
        SagaEvent::StepAbandoned(StepFailedData {
            step: error.step,
            error,
            attempts,
            failed_at: Utc::now(),
        })
    }

    pub fn compensation(action: CompensationAction, error: Option<String>) -> Self {
        SagaEvent::CompensationExecuted(CompensationData {
            action,
            succeeded: error.is_none(),
            error,
            executed_at: Utc::now(),
        })
    }

    fn completed_data(step: Step) -> StepCompletedData {
        StepCompletedData {
            step,
            order_id: None,
            payment_id: None,
            transaction_id: None,
            completed_at: Utc::now(),
        }
    }
}
