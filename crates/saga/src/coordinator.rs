//! Saga coordinator for the order fulfillment saga.
//!
//! The coordinator drives one saga run from its journaled state to a terminal
//! outcome. Each step is journaled before it starts, its activity runs on a
//! spawned task, and the task is raced against the cancellation channel with
//! the signal taking precedence. Every event is journaled before the new
//! state is published to queries.

use std::future::Future;

use common::{CustomerId, OrderId, PaymentId};
use domain::notification::{confirmation_message, failure_message};
use domain::{NotificationType, OrderStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::activities::Activities;
use crate::config::SagaConfig;
use crate::error::{ErrorCode, Result, SagaError, StepError};
use crate::events::{
    CancellationData, CancellationRejectedData, CompensationAction, SagaCancelledData,
    SagaCompletedData, SagaEvent, SagaFailedData,
};
use crate::handle::CancelRequest;
use crate::journal::SagaJournal;
use crate::order_fulfillment::{MESSAGE_CANCELLED, MESSAGE_COMPLETED, Step};
use crate::policy::{RetryPolicy, should_release_inventory};
use crate::services::NotificationRequest;
use crate::state::{SagaState, SagaStatus};

/// Final outcome of a saga run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub order_id: Option<OrderId>,
    pub status: OrderStatus,
    pub success: bool,
    pub message: String,
    pub payment_id: Option<PaymentId>,
    pub error: Option<ErrorCode>,
}

impl WorkflowResult {
    pub fn from_state(state: &SagaState) -> Self {
        let (message, error) = match state.status() {
            SagaStatus::Completed => (MESSAGE_COMPLETED.to_string(), None),
            SagaStatus::Cancelled => (MESSAGE_CANCELLED.to_string(), Some(ErrorCode::OrderCancelled)),
            SagaStatus::Failed => (
                state
                    .error_message()
                    .unwrap_or("Order processing failed")
                    .to_string(),
                state.error_code(),
            ),
            SagaStatus::Running => ("Order is being processed".to_string(), None),
        };

        Self {
            order_id: state.order_id().cloned(),
            status: state.order_status(),
            success: state.status() == SagaStatus::Completed,
            message,
            payment_id: state.payment_id().cloned(),
            error,
        }
    }
}

enum StepOutcome<T> {
    Completed(T),
    Failed { error: StepError, attempts: u32 },
    Cancelled,
}

enum Race<T> {
    Signal(CancelRequest),
    Finished(T),
}

/// Mutable state of one run: the saga snapshot plus its channels.
pub struct RunContext {
    state: SagaState,
    state_tx: watch::Sender<SagaState>,
    signals: mpsc::UnboundedReceiver<CancelRequest>,
}

impl RunContext {
    pub fn new(
        state: SagaState,
        state_tx: watch::Sender<SagaState>,
        signals: mpsc::UnboundedReceiver<CancelRequest>,
    ) -> Self {
        Self {
            state,
            state_tx,
            signals,
        }
    }

    pub fn state(&self) -> &SagaState {
        &self.state
    }
}

/// Orchestrates order fulfillment sagas.
///
/// Steps run strictly in order:
/// `CreateOrder → CheckInventory → ProcessPayment → SendNotification → Complete`.
/// A failure leads to the failure path, an accepted cancellation to the
/// cancellation path. The coordinator holds no per-saga state, so one
/// instance serves every run.
#[derive(Clone)]
pub struct SagaCoordinator {
    activities: Activities,
    journal: SagaJournal,
    config: SagaConfig,
}

impl SagaCoordinator {
    pub fn new(activities: Activities, journal: SagaJournal, config: SagaConfig) -> Self {
        Self {
            activities,
            journal,
            config,
        }
    }

    /// Runs a saga from wherever its journal left off.
    ///
    /// A recorded cancellation or fatal step failure resumes into the
    /// matching compensation path; a terminal saga returns its outcome
    /// without doing anything.
    #[tracing::instrument(skip(self, ctx), fields(saga_id = ?ctx.state.saga_id()))]
    pub async fn run(&self, ctx: &mut RunContext) -> Result<WorkflowResult> {
        if ctx.state.is_terminal() {
            return Ok(WorkflowResult::from_state(&ctx.state));
        }

        let result = if ctx.state.is_cancelled() {
            let step = ctx.state.current_step().unwrap_or(Step::CreateOrder);
            self.cancellation_path(ctx, step).await?
        } else if let Some(error) = ctx.state.error().cloned() {
            self.failure_path(ctx, error).await?
        } else {
            self.forward(ctx).await?
        };

        let duration = ctx.state.duration().num_milliseconds() as f64 / 1000.0;
        metrics::histogram!("saga_duration_seconds").record(duration);
        Ok(result)
    }

    async fn forward(&self, ctx: &mut RunContext) -> Result<WorkflowResult> {
        while let Some(step) = ctx.state.next_step() {
            if step.accepts_cancellation() {
                if let Some(request) = Self::pending_cancel(ctx) {
                    self.record_cancellation(ctx, request, None).await?;
                    return self.cancellation_path(ctx, step).await;
                }
            } else {
                self.reject_pending(ctx).await?;
            }

            tracing::info!(step = %step, "saga step started");
            match step {
                Step::CreateOrder => {
                    let activity = self.activities.create_order.clone();
                    let order_id = self.planned_order_id(ctx)?;
                    let customer_id = self.customer_id(ctx)?;
                    let items = ctx.state.items().to_vec();
                    let outcome = self
                        .run_step(ctx, step, move || {
                            let activity = activity.clone();
                            let (order_id, customer_id, items) =
                                (order_id.clone(), customer_id.clone(), items.clone());
                            async move { activity.execute(order_id, customer_id, items).await }
                        })
                        .await?;
                    match outcome {
                        StepOutcome::Completed(order) => {
                            tracing::info!(order_id = %order.id, "order created");
                            self.record(ctx, SagaEvent::order_created(order.id)).await?;
                        }
                        StepOutcome::Failed { error, attempts } => {
                            return self.fail_step(ctx, error, attempts).await;
                        }
                        StepOutcome::Cancelled => return self.cancellation_path(ctx, step).await,
                    }
                }
                Step::CheckInventory => {
                    let activity = self.activities.check_inventory.clone();
                    let order_id = self.known_order_id(ctx)?;
                    let outcome = self
                        .run_step(ctx, step, move || {
                            let activity = activity.clone();
                            let order_id = order_id.clone();
                            async move { activity.execute(order_id).await }
                        })
                        .await?;
                    match outcome {
                        StepOutcome::Completed(reservation) if reservation.available => {
                            self.record(ctx, SagaEvent::step_completed(step)).await?;
                        }
                        StepOutcome::Completed(reservation) => {
                            let products: Vec<_> = reservation
                                .unavailable
                                .iter()
                                .map(|item| item.product_id.to_string())
                                .collect();
                            let error = StepError::decline(
                                step,
                                format!("Some items are not available: {}", products.join(", ")),
                            );
                            return self.fail_step(ctx, error, 1).await;
                        }
                        StepOutcome::Failed { error, attempts } => {
                            return self.fail_step(ctx, error, attempts).await;
                        }
                        StepOutcome::Cancelled => return self.cancellation_path(ctx, step).await,
                    }
                }
                Step::ProcessPayment => {
                    let activity = self.activities.process_payment.clone();
                    let order_id = self.known_order_id(ctx)?;
                    let outcome = self
                        .run_step(ctx, step, move || {
                            let activity = activity.clone();
                            let order_id = order_id.clone();
                            async move { activity.execute(order_id).await }
                        })
                        .await?;
                    match outcome {
                        StepOutcome::Completed(payment) => {
                            tracing::info!(payment_id = %payment.id, "payment processed");
                            let event =
                                SagaEvent::payment_processed(payment.id, payment.transaction_id);
                            self.record(ctx, event).await?;
                        }
                        StepOutcome::Failed { error, attempts } => {
                            return self.fail_step(ctx, error, attempts).await;
                        }
                        StepOutcome::Cancelled => return self.cancellation_path(ctx, step).await,
                    }
                }
                Step::SendNotification => {
                    let activity = self.activities.send_notification.clone();
                    let request = self.notification(
                        ctx,
                        NotificationType::OrderConfirmed,
                        self.known_order_id(ctx)?,
                        None,
                    )?;
                    let outcome = self
                        .run_step(ctx, step, move || {
                            let activity = activity.clone();
                            let request = request.clone();
                            async move { activity.execute(request).await }
                        })
                        .await?;
                    match outcome {
                        StepOutcome::Completed(_) => {
                            self.record(ctx, SagaEvent::step_completed(step)).await?;
                        }
                        StepOutcome::Failed { error, attempts } => {
                            tracing::warn!(error = %error, "confirmation not sent, continuing");
                            metrics::counter!(
                                "saga_notification_failures_total",
                                "type" => NotificationType::OrderConfirmed.as_str()
                            )
                            .increment(1);
                            self.record(ctx, SagaEvent::step_abandoned(error, attempts))
                                .await?;
                        }
                        StepOutcome::Cancelled => return self.cancellation_path(ctx, step).await,
                    }
                }
                Step::Complete => {
                    let activity = self.activities.complete_order.clone();
                    let order_id = self.known_order_id(ctx)?;
                    let outcome = self
                        .run_step(ctx, step, move || {
                            let activity = activity.clone();
                            let order_id = order_id.clone();
                            async move { activity.execute(order_id).await }
                        })
                        .await?;
                    match outcome {
                        StepOutcome::Completed(_) => {
                            self.record(ctx, SagaEvent::step_completed(step)).await?;
                        }
                        StepOutcome::Failed { error, attempts } => {
                            return self.fail_step(ctx, error, attempts).await;
                        }
                        StepOutcome::Cancelled => return self.cancellation_path(ctx, step).await,
                    }
                }
            }
        }

        self.reject_pending(ctx).await?;
        let order_id = self.known_order_id(ctx)?;
        let completed = SagaEvent::SagaCompleted(SagaCompletedData {
            order_id,
            payment_id: ctx.state.payment_id().cloned(),
            completed_at: chrono::Utc::now(),
        });
        self.record(ctx, completed).await?;

        metrics::counter!("saga_completed").increment(1);
        tracing::info!(
            order_id = ?ctx.state.order_id(),
            payment_id = ?ctx.state.payment_id(),
            "saga completed successfully"
        );
        Ok(WorkflowResult::from_state(&ctx.state))
    }

    /// Journals the step start, then runs its activity until it succeeds,
    /// fails for good or loses the race against a cancellation.
    ///
    /// The activity task is never aborted. When the signal wins, the
    /// in-flight attempt is awaited and its result discarded so that
    /// compensation sees every side effect it made.
    async fn run_step<T, F, Fut>(
        &self,
        ctx: &mut RunContext,
        step: Step,
        make: F,
    ) -> Result<StepOutcome<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, StepError>> + Send + 'static,
    {
        let policy = self.config.retry.for_step(step).clone();
        let cancellable = step.accepts_cancellation();
        self.record(ctx, SagaEvent::step_started(step)).await?;

        let mut attempt = 1;
        loop {
            let mut task = tokio::spawn(make());

            let race = if cancellable {
                tokio::select! {
                    biased;
                    Some(request) = ctx.signals.recv() => Race::Signal(request),
                    joined = &mut task => Race::Finished(joined),
                }
            } else {
                Race::Finished((&mut task).await)
            };

            let joined = match race {
                Race::Signal(request) => {
                    self.record_cancellation(ctx, request, Some(step)).await?;
                    if let Err(e) = task.await {
                        tracing::warn!(step = %step, error = %e, "interrupted activity panicked");
                    }
                    return Ok(StepOutcome::Cancelled);
                }
                Race::Finished(joined) => joined,
            };

            let result = joined.unwrap_or_else(|e| {
                Err(StepError::internal(step, format!("activity task failed: {e}")))
            });

            match result {
                Ok(value) => {
                    tracing::info!(step = %step, attempt, "saga step completed");
                    return Ok(StepOutcome::Completed(value));
                }
                Err(error) if policy.should_retry(attempt, &error) => {
                    let delay = policy.delay_for_retry(attempt - 1);
                    tracing::warn!(
                        step = %step,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "saga step failed, retrying"
                    );
                    metrics::counter!("saga_step_retries_total", "step" => step.as_str())
                        .increment(1);
                    self.record(ctx, SagaEvent::step_retried(attempt, error, delay))
                        .await?;

                    if cancellable {
                        let race = tokio::select! {
                            biased;
                            Some(request) = ctx.signals.recv() => Race::Signal(request),
                            _ = tokio::time::sleep(delay) => Race::Finished(()),
                        };
                        if let Race::Signal(request) = race {
                            self.record_cancellation(ctx, request, Some(step)).await?;
                            return Ok(StepOutcome::Cancelled);
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    tracing::warn!(step = %step, attempt, error = %error, "saga step failed");
                    return Ok(StepOutcome::Failed {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Runs a compensating activity with the compensation retry policy.
    /// Failures are journaled and logged, never propagated.
    async fn compensate<T, F, Fut>(
        &self,
        ctx: &mut RunContext,
        action: CompensationAction,
        make: F,
    ) -> Result<Option<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, StepError>> + Send + 'static,
    {
        let policy: &RetryPolicy = &self.config.retry.compensation;
        let mut attempt = 1;
        let outcome = loop {
            let result = tokio::spawn(make()).await.unwrap_or_else(|e| {
                Err(StepError::internal(
                    ctx.state.current_step().unwrap_or(Step::CreateOrder),
                    format!("compensation task failed: {e}"),
                ))
            });
            match result {
                Ok(value) => break Ok(value),
                Err(error) if policy.should_retry(attempt, &error) => {
                    tokio::time::sleep(policy.delay_for_retry(attempt - 1)).await;
                    attempt += 1;
                }
                Err(error) => break Err(error),
            }
        };

        match outcome {
            Ok(value) => {
                self.record(ctx, SagaEvent::compensation(action, None)).await?;
                Ok(Some(value))
            }
            Err(error) => {
                tracing::error!(?action, error = %error, "compensation failed");
                self.record(ctx, SagaEvent::compensation(action, Some(error.message)))
                    .await?;
                Ok(None)
            }
        }
    }

    async fn fail_step(
        &self,
        ctx: &mut RunContext,
        error: StepError,
        attempts: u32,
    ) -> Result<WorkflowResult> {
        self.record(ctx, SagaEvent::step_failed(error.clone(), attempts))
            .await?;
        self.failure_path(ctx, error).await
    }

    /// Releases stock where the policy asks for it, notifies the customer,
    /// marks the order failed and closes the saga.
    async fn failure_path(&self, ctx: &mut RunContext, error: StepError) -> Result<WorkflowResult> {
        let step = error.step;
        tracing::warn!(
            step = %step,
            code = %error.code,
            message = %error.message,
            "handling order failure"
        );

        let order_id = ctx.state.order_id().cloned();
        if let Some(order_id) = order_id.clone()
            && should_release_inventory(step, error.kind)
        {
            let activity = self.activities.release_inventory.clone();
            self.compensate(ctx, CompensationAction::ReleaseInventory, move || {
                let activity = activity.clone();
                let order_id = order_id.clone();
                async move { activity.execute(step, order_id).await }
            })
            .await?;
        }

        if let Some(order_id) = order_id {
            let kind = if step == Step::ProcessPayment {
                NotificationType::PaymentFailed
            } else {
                NotificationType::OrderFailed
            };
            let message = failure_message(&order_id, Some(&error.message));
            self.notify_best_effort(ctx, kind, order_id.clone(), Some(message))
                .await?;

            let activity = self.activities.fail_order.clone();
            let reason = error.message.clone();
            self.compensate(ctx, CompensationAction::FailOrder, move || {
                let activity = activity.clone();
                let (order_id, reason) = (order_id.clone(), reason.clone());
                async move { activity.execute(step, order_id, reason).await }
            })
            .await?;
        }

        self.reject_pending(ctx).await?;
        let failed = SagaEvent::SagaFailed(SagaFailedData {
            error,
            failed_at: chrono::Utc::now(),
        });
        self.record(ctx, failed).await?;

        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(order_id = ?ctx.state.order_id(), code = ?ctx.state.error_code(), "saga failed");
        Ok(WorkflowResult::from_state(&ctx.state))
    }

    /// Undoes the order and closes the saga as cancelled. The cancellation
    /// itself must already be journaled.
    async fn cancellation_path(&self, ctx: &mut RunContext, step: Step) -> Result<WorkflowResult> {
        // the interrupted activity may have created the order without the
        // saga recording it
        let order_id = match ctx.state.order_id() {
            Some(id) => Some(id.clone()),
            None => ctx.state.planned_order_id().cloned(),
        };
        tracing::info!(order_id = ?order_id, step = %step, "handling order cancellation");

        if let Some(order_id) = order_id {
            let activity = self.activities.cancel_order.clone();
            let payment_id = ctx.state.payment_id().cloned();
            let cancel_id = order_id.clone();
            let outcome = self
                .compensate(ctx, CompensationAction::CancelOrder, move || {
                    let activity = activity.clone();
                    let (order_id, payment_id) = (cancel_id.clone(), payment_id.clone());
                    async move { activity.execute(step, order_id, payment_id).await }
                })
                .await?;

            let order_exists = match &outcome {
                Some(outcome) => outcome.order_found,
                None => ctx.state.order_id().is_some(),
            };
            if order_exists {
                self.notify_best_effort(ctx, NotificationType::OrderCancelled, order_id, None)
                    .await?;
            }
        }

        let cancelled = SagaEvent::SagaCancelled(SagaCancelledData {
            cancelled_at: chrono::Utc::now(),
        });
        self.record(ctx, cancelled).await?;

        metrics::counter!("saga_cancelled").increment(1);
        tracing::info!(
            reason = ?ctx.state.cancellation_reason(),
            requested_by = ?ctx.state.cancelled_by(),
            "saga cancelled"
        );
        Ok(WorkflowResult::from_state(&ctx.state))
    }

    async fn notify_best_effort(
        &self,
        ctx: &mut RunContext,
        kind: NotificationType,
        order_id: OrderId,
        message: Option<String>,
    ) -> Result<()> {
        let request = self.notification(ctx, kind, order_id, message)?;
        let activity = self.activities.send_notification.clone();
        let sent = self
            .compensate(ctx, CompensationAction::NotifyCustomer, move || {
                let activity = activity.clone();
                let request = request.clone();
                async move { activity.execute(request).await }
            })
            .await?;

        if sent.is_none() {
            metrics::counter!("saga_notification_failures_total", "type" => kind.as_str())
                .increment(1);
        }
        Ok(())
    }

    fn notification(
        &self,
        ctx: &RunContext,
        kind: NotificationType,
        order_id: OrderId,
        message: Option<String>,
    ) -> Result<NotificationRequest> {
        let message = match (kind, message) {
            (_, Some(message)) => Some(message),
            (NotificationType::OrderConfirmed, None) => Some(confirmation_message(
                &order_id,
                ctx.state.payment_id(),
            )),
            (_, None) => None,
        };
        Ok(NotificationRequest {
            order_id,
            customer_id: self.customer_id(ctx)?,
            kind,
            channel: self.config.notification_channel,
            subject: None,
            message,
        })
    }

    /// Takes the first queued cancellation request, if any.
    fn pending_cancel(ctx: &mut RunContext) -> Option<CancelRequest> {
        ctx.signals.try_recv().ok()
    }

    /// Rejects every queued cancellation request.
    async fn reject_pending(&self, ctx: &mut RunContext) -> Result<()> {
        while let Ok(request) = ctx.signals.try_recv() {
            let step = ctx.state.current_step();
            tracing::warn!(
                step = ?step,
                requested_by = %request.requested_by,
                "cancellation rejected, order past the point of no return"
            );
            metrics::counter!("saga_cancellations_rejected_total").increment(1);
            let rejected = SagaEvent::CancellationRejected(CancellationRejectedData {
                reason: request.reason,
                step,
                rejected_at: chrono::Utc::now(),
            });
            self.record(ctx, rejected).await?;
        }
        Ok(())
    }

    async fn record_cancellation(
        &self,
        ctx: &mut RunContext,
        request: CancelRequest,
        step: Option<Step>,
    ) -> Result<()> {
        tracing::info!(
            step = ?step,
            reason = %request.reason,
            requested_by = %request.requested_by,
            "received cancel signal"
        );
        let event = SagaEvent::CancellationRequested(CancellationData {
            reason: request.reason,
            requested_by: request.requested_by,
            step,
            requested_at: chrono::Utc::now(),
        });
        self.record(ctx, event).await
    }

    /// Journals the event, then publishes the new state.
    async fn record(&self, ctx: &mut RunContext, event: SagaEvent) -> Result<()> {
        self.journal.record(&mut ctx.state, event).await?;
        ctx.state_tx.send_replace(ctx.state.clone());
        Ok(())
    }

    fn planned_order_id(&self, ctx: &RunContext) -> Result<OrderId> {
        ctx.state.planned_order_id().cloned().ok_or_else(|| {
            SagaError::InvalidInput("saga has no planned order id".to_string())
        })
    }

    fn customer_id(&self, ctx: &RunContext) -> Result<CustomerId> {
        ctx.state.customer_id().cloned().ok_or_else(|| {
            SagaError::InvalidInput("saga has no customer id".to_string())
        })
    }

    fn known_order_id(&self, ctx: &RunContext) -> Result<OrderId> {
        ctx.state.order_id().cloned().ok_or_else(|| {
            SagaError::InvalidInput("order has not been created".to_string())
        })
    }
}
