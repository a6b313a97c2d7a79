//! Saga state, rebuilt by folding the saga's journal.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId, OrderId, PaymentId};
use domain::{Aggregate, OrderItem, OrderStatus};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, StepError};
use crate::events::{CompensationData, SagaEvent};
use crate::order_fulfillment::{SAGA_TYPE, Step};

/// Lifecycle of a saga run.
///
/// ```text
/// Running ──┬──► Completed
///           ├──► Failed
///           └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SagaStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "running",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    /// Best-effort step that gave up.
    Abandoned,
    /// Interrupted by a cancellation signal.
    Cancelled,
}

/// One execution of a step, including its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step: Step,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<StepError>,
    pub retry_count: u32,
}

impl StepExecution {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Progress report returned by the `progress` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: Option<Step>,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub percent: f64,
    pub is_completed: bool,
    pub is_failed: bool,
    pub is_cancelled: bool,
    pub duration_seconds: f64,
}

/// Snapshot of a saga run. Mutated only by applying journal events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaState {
    saga_id: Option<AggregateId>,
    /// Set once the order record exists.
    order_id: Option<OrderId>,
    planned_order_id: Option<OrderId>,
    customer_id: Option<CustomerId>,
    items: Vec<OrderItem>,
    current_step: Option<Step>,
    status: SagaStatus,
    order_status: OrderStatus,
    error: Option<StepError>,
    retry_count: u32,
    is_cancelled: bool,
    cancellation_reason: Option<String>,
    cancelled_by: Option<String>,
    rejected_cancellations: u32,
    payment_id: Option<PaymentId>,
    transaction_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    step_history: Vec<StepExecution>,
    compensations: Vec<CompensationData>,
    version: Version,
}

impl Aggregate for SagaState {
    type Event = SagaEvent;

    fn aggregate_type() -> &'static str {
        SAGA_TYPE
    }

    fn id(&self) -> Option<AggregateId> {
        self.saga_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        if self.status.is_terminal() {
            return;
        }

        match event {
            SagaEvent::SagaStarted(data) => {
                self.saga_id = Some(data.saga_id);
                self.planned_order_id = Some(data.order_id);
                self.customer_id = Some(data.customer_id);
                self.items = data.items;
                self.started_at = Some(data.started_at);
                self.status = SagaStatus::Running;
                self.order_status = OrderStatus::Pending;
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = Some(data.step);
                let resumed = self
                    .step_history
                    .last()
                    .is_some_and(|last| last.step == data.step && last.status == StepStatus::Running);
                if !resumed {
                    self.step_history.push(StepExecution {
                        step: data.step,
                        status: StepStatus::Running,
                        started_at: data.started_at,
                        completed_at: None,
                        error: None,
                        retry_count: 0,
                    });
                }
            }
            SagaEvent::StepRetried(data) => {
                self.retry_count += 1;
                if let Some(entry) = self.running_entry(data.step) {
                    entry.retry_count += 1;
                    entry.error = Some(data.error);
                }
            }
            SagaEvent::StepCompleted(data) => {
                if let Some(order_id) = data.order_id {
                    self.order_id = Some(order_id);
                }
                if let Some(payment_id) = data.payment_id {
                    self.payment_id = Some(payment_id);
                }
                if data.transaction_id.is_some() {
                    self.transaction_id = data.transaction_id;
                }
                match data.step {
                    Step::CheckInventory => self.order_status = OrderStatus::Validating,
                    Step::ProcessPayment => self.order_status = OrderStatus::Payment,
                    _ => {}
                }
                self.close_entry(data.step, StepStatus::Completed, None, data.completed_at);
            }
            SagaEvent::StepFailed(data) => {
                self.close_entry(
                    data.step,
                    StepStatus::Failed,
                    Some(data.error.clone()),
                    data.failed_at,
                );
                self.error = Some(data.error);
            }
            SagaEvent::StepAbandoned(data) => {
                self.close_entry(data.step, StepStatus::Abandoned, Some(data.error), data.failed_at);
            }
            SagaEvent::CancellationRequested(data) => {
                self.is_cancelled = true;
                self.cancellation_reason = Some(data.reason);
                self.cancelled_by = Some(data.requested_by);
                if let Some(step) = data.step {
                    self.close_entry(step, StepStatus::Cancelled, None, data.requested_at);
                }
            }
            SagaEvent::CancellationRejected(_) => {
                self.rejected_cancellations += 1;
            }
            SagaEvent::CompensationExecuted(data) => {
                self.compensations.push(data);
            }
            SagaEvent::SagaCompleted(data) => {
                self.order_id = Some(data.order_id);
                if data.payment_id.is_some() {
                    self.payment_id = data.payment_id;
                }
                self.status = SagaStatus::Completed;
                self.order_status = OrderStatus::Completed;
                self.completed_at = Some(data.completed_at);
            }
            SagaEvent::SagaFailed(data) => {
                self.error = Some(data.error);
                self.status = SagaStatus::Failed;
                self.order_status = OrderStatus::Failed;
                self.completed_at = Some(data.failed_at);
            }
            SagaEvent::SagaCancelled(data) => {
                self.status = SagaStatus::Cancelled;
                self.order_status = OrderStatus::Cancelled;
                self.completed_at = Some(data.cancelled_at);
            }
        }
    }
}

impl SagaState {
    fn running_entry(&mut self, step: Step) -> Option<&mut StepExecution> {
        self.step_history
            .iter_mut()
            .rev()
            .find(|entry| entry.step == step && entry.status == StepStatus::Running)
    }

    fn close_entry(
        &mut self,
        step: Step,
        status: StepStatus,
        error: Option<StepError>,
        at: DateTime<Utc>,
    ) {
        if let Some(entry) = self.running_entry(step) {
            entry.status = status;
            entry.completed_at = Some(at);
            if error.is_some() {
                entry.error = error;
            }
        }
    }
}

// Query methods
impl SagaState {
    pub fn saga_id(&self) -> Option<AggregateId> {
        self.saga_id
    }

    /// Id of the created order, `None` before CreateOrder completed.
    pub fn order_id(&self) -> Option<&OrderId> {
        self.order_id.as_ref()
    }

    /// Id the saga creates its order under.
    pub fn planned_order_id(&self) -> Option<&OrderId> {
        self.planned_order_id.as_ref()
    }

    pub fn customer_id(&self) -> Option<&CustomerId> {
        self.customer_id.as_ref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn current_step(&self) -> Option<Step> {
        self.current_step
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mirror of the order's status as seen by the saga.
    pub fn order_status(&self) -> OrderStatus {
        self.order_status
    }

    pub fn error(&self) -> Option<&StepError> {
        self.error.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Retries across all steps.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn cancelled_by(&self) -> Option<&str> {
        self.cancelled_by.as_deref()
    }

    pub fn rejected_cancellations(&self) -> u32 {
        self.rejected_cancellations
    }

    pub fn payment_id(&self) -> Option<&PaymentId> {
        self.payment_id.as_ref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn step_history(&self) -> &[StepExecution] {
        &self.step_history
    }

    pub fn compensations(&self) -> &[CompensationData] {
        &self.compensations
    }

    pub fn has_completed(&self, step: Step) -> bool {
        self.step_history
            .iter()
            .any(|entry| entry.step == step && entry.status == StepStatus::Completed)
    }

    /// Whether `step` is done for good: completed, or abandoned after its
    /// retries ran out.
    pub fn is_settled(&self, step: Step) -> bool {
        self.step_history.iter().any(|entry| {
            entry.step == step
                && matches!(entry.status, StepStatus::Completed | StepStatus::Abandoned)
        })
    }

    /// Step a resumed run starts at: the first step that is not settled.
    /// `None` once every step is.
    pub fn next_step(&self) -> Option<Step> {
        Step::ALL.into_iter().find(|step| !self.is_settled(*step))
    }

    /// Time from start to completion, or to `now` while running.
    pub fn duration_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.started_at {
            Some(start) => self.completed_at.unwrap_or(now) - start,
            None => chrono::Duration::zero(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.duration_at(Utc::now())
    }

    /// Duration of the most recent finished execution of `step`.
    pub fn step_duration(&self, step: Step) -> Option<chrono::Duration> {
        self.step_history
            .iter()
            .rev()
            .find(|entry| entry.step == step)
            .and_then(StepExecution::duration)
    }

    pub fn progress(&self) -> Progress {
        let index = self.current_step.map(|s| s.index()).unwrap_or(0);
        Progress {
            current_step: self.current_step,
            current_step_index: index,
            total_steps: Step::TOTAL,
            percent: f64::from(index) / f64::from(Step::TOTAL) * 100.0,
            is_completed: self.status == SagaStatus::Completed,
            is_failed: self.status == SagaStatus::Failed,
            is_cancelled: self.status == SagaStatus::Cancelled,
            duration_seconds: self.duration().num_milliseconds() as f64 / 1000.0,
        }
    }
}
