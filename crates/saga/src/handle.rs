//! Saga engine and handles.
//!
//! The engine starts and resumes saga runs on the tokio runtime. A
//! [`SagaHandle`] is the caller's view of one run: it delivers signals,
//! answers queries from the latest journaled state and resolves to the
//! run's [`WorkflowResult`].

use std::collections::HashMap;
use std::sync::Arc;

use common::{AggregateId, CustomerId, OrderId};
use domain::{OrderItem, OrderStatus};
use event_store::EventStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc, watch};

use crate::activities::{Activities, SagaServices};
use crate::config::SagaConfig;
use crate::coordinator::{RunContext, SagaCoordinator, WorkflowResult};
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::journal::SagaJournal;
use crate::order_fulfillment::{
    QUERY_ORDER_STATUS, QUERY_PROGRESS, QUERY_STEP_HISTORY, QUERY_WORKFLOW_STATE,
    SIGNAL_CANCEL_ORDER,
};
use crate::state::{Progress, SagaState, StepExecution};

/// Payload of the `cancel-order` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub reason: String,
    pub requested_by: String,
}

impl CancelRequest {
    pub fn new(reason: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            requested_by: requested_by.into(),
        }
    }
}

impl Default for CancelRequest {
    fn default() -> Self {
        Self::new("Customer cancellation", "customer")
    }
}

type Outcome = Option<std::result::Result<WorkflowResult, String>>;

/// Caller's handle to one saga run.
#[derive(Clone)]
pub struct SagaHandle {
    saga_id: AggregateId,
    /// `None` when no run is active.
    signals: Option<mpsc::UnboundedSender<CancelRequest>>,
    state: watch::Receiver<SagaState>,
    outcome: watch::Receiver<Outcome>,
}

impl SagaHandle {
    /// Handle over a journaled saga without an active run.
    fn detached(saga_id: AggregateId, state: SagaState) -> Self {
        let outcome = state
            .is_terminal()
            .then(|| Ok(WorkflowResult::from_state(&state)));
        let (_, state) = watch::channel(state);
        let (_, outcome) = watch::channel(outcome);
        Self {
            saga_id,
            signals: None,
            state,
            outcome,
        }
    }

    pub fn saga_id(&self) -> AggregateId {
        self.saga_id
    }

    /// Id the saga's order is created under.
    pub fn order_id(&self) -> Option<OrderId> {
        let state = self.state.borrow();
        state
            .order_id()
            .or(state.planned_order_id())
            .cloned()
    }

    /// Asks the saga to cancel its order.
    ///
    /// Rejected right away once the saga is past payment. A request that
    /// passes this check can still be rejected by the run itself if the
    /// saga moves on before it observes the signal.
    pub fn cancel(&self, request: CancelRequest) -> Result<()> {
        {
            let state = self.state.borrow();
            if state.is_terminal() {
                return Err(SagaError::AlreadyFinished(self.saga_id));
            }
            if let Some(step) = state.current_step()
                && !step.accepts_cancellation()
            {
                metrics::counter!("saga_cancellations_rejected_total").increment(1);
                tracing::warn!(saga_id = %self.saga_id, %step, "cancellation rejected");
                return Err(SagaError::CancellationRejected(format!(
                    "order is already at step {step}"
                )));
            }
        }

        let signals = self
            .signals
            .as_ref()
            .ok_or(SagaError::NotRunning(self.saga_id))?;
        signals
            .send(request)
            .map_err(|_| SagaError::AlreadyFinished(self.saga_id))
    }

    /// Delivers a named signal with a JSON payload.
    pub fn signal(&self, name: &str, payload: Value) -> Result<()> {
        match name {
            SIGNAL_CANCEL_ORDER => {
                let request = if payload.is_null() {
                    CancelRequest::default()
                } else {
                    serde_json::from_value(payload)?
                };
                self.cancel(request)
            }
            other => Err(SagaError::UnknownSignal(other.to_string())),
        }
    }

    /// Answers a named query from the latest state.
    pub fn query(&self, name: &str) -> Result<Value> {
        let state = self.state.borrow();
        let value = match name {
            QUERY_ORDER_STATUS => serde_json::to_value(state.order_status())?,
            QUERY_WORKFLOW_STATE => serde_json::to_value(&*state)?,
            QUERY_STEP_HISTORY => serde_json::to_value(state.step_history())?,
            QUERY_PROGRESS => serde_json::to_value(state.progress())?,
            other => return Err(SagaError::UnknownQuery(other.to_string())),
        };
        Ok(value)
    }

    pub fn status(&self) -> OrderStatus {
        self.state.borrow().order_status()
    }

    pub fn state(&self) -> SagaState {
        self.state.borrow().clone()
    }

    pub fn progress(&self) -> Progress {
        self.state.borrow().progress()
    }

    pub fn step_history(&self) -> Vec<StepExecution> {
        self.state.borrow().step_history().to_vec()
    }

    /// Waits until the state satisfies `f` and returns that state.
    pub async fn wait_for_state(&self, f: impl FnMut(&SagaState) -> bool) -> Result<SagaState> {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(f)
            .await
            .map_err(|_| SagaError::NotRunning(self.saga_id))?;
        Ok(matched.clone())
    }

    /// Waits for the run to finish.
    pub async fn outcome(&self) -> Result<WorkflowResult> {
        let mut outcome = self.outcome.clone();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SagaError::NotRunning(self.saga_id))?
            .clone();

        match finished {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(SagaError::Aborted(message)),
            None => Err(SagaError::NotRunning(self.saga_id)),
        }
    }
}

struct EngineInner {
    coordinator: SagaCoordinator,
    journal: SagaJournal,
    running: RwLock<HashMap<AggregateId, SagaHandle>>,
}

/// Starts, resumes and looks up saga runs.
#[derive(Clone)]
pub struct SagaEngine {
    inner: Arc<EngineInner>,
}

impl SagaEngine {
    pub fn new(config: SagaConfig, services: SagaServices, store: Arc<dyn EventStore>) -> Self {
        let journal = SagaJournal::new(store);
        let activities = Activities::new(&services, &config);
        let coordinator = SagaCoordinator::new(activities, journal.clone(), config);
        Self {
            inner: Arc::new(EngineInner {
                coordinator,
                journal,
                running: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Journals a new saga and starts running it.
    ///
    /// Input is validated by the first step, so malformed orders produce a
    /// failed saga rather than an error here.
    #[tracing::instrument(skip(self, items), fields(customer_id = %customer_id, items = items.len()))]
    pub async fn start_saga(
        &self,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<SagaHandle> {
        let saga_id = AggregateId::new();
        let mut state = SagaState::default();
        let started = SagaEvent::saga_started(saga_id, OrderId::generate(), customer_id, items);
        self.inner.journal.record(&mut state, started).await?;

        metrics::counter!("saga_executions_total").increment(1);
        tracing::info!(%saga_id, "saga started");
        self.launch(saga_id, state).await
    }

    /// Continues an unfinished saga from its journal.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, saga_id: AggregateId) -> Result<SagaHandle> {
        if self.inner.running.read().await.contains_key(&saga_id) {
            return Err(SagaError::AlreadyRunning(saga_id));
        }

        let state = self
            .inner
            .journal
            .load(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;
        if state.is_terminal() {
            return Ok(SagaHandle::detached(saga_id, state));
        }

        tracing::info!(next_step = ?state.next_step(), "resuming saga");
        self.launch(saga_id, state).await
    }

    /// Resumes every unfinished saga found in the journal.
    pub async fn recover_all(&self) -> Result<Vec<SagaHandle>> {
        let mut resumed = Vec::new();
        for saga_id in self.inner.journal.saga_ids().await? {
            if self.inner.running.read().await.contains_key(&saga_id) {
                continue;
            }
            let Some(state) = self.inner.journal.load(saga_id).await? else {
                continue;
            };
            if state.is_terminal() {
                continue;
            }
            match self.launch(saga_id, state).await {
                Ok(handle) => resumed.push(handle),
                Err(SagaError::AlreadyRunning(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(count = resumed.len(), "recovered unfinished sagas");
        Ok(resumed)
    }

    /// Handle of a running saga, or of a journaled one that is not running.
    pub async fn handle(&self, saga_id: AggregateId) -> Result<SagaHandle> {
        if let Some(handle) = self.inner.running.read().await.get(&saga_id) {
            return Ok(handle.clone());
        }
        let state = self
            .inner
            .journal
            .load(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;
        Ok(SagaHandle::detached(saga_id, state))
    }

    pub async fn signal(&self, saga_id: AggregateId, name: &str, payload: Value) -> Result<()> {
        self.handle(saga_id).await?.signal(name, payload)
    }

    pub async fn query(&self, saga_id: AggregateId, name: &str) -> Result<Value> {
        self.handle(saga_id).await?.query(name)
    }

    pub async fn running_count(&self) -> usize {
        self.inner.running.read().await.len()
    }

    async fn launch(&self, saga_id: AggregateId, state: SagaState) -> Result<SagaHandle> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = SagaHandle {
            saga_id,
            signals: Some(signal_tx),
            state: state_rx,
            outcome: outcome_rx,
        };

        {
            let mut running = self.inner.running.write().await;
            if running.contains_key(&saga_id) {
                return Err(SagaError::AlreadyRunning(saga_id));
            }
            running.insert(saga_id, handle.clone());
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ctx = RunContext::new(state, state_tx, signal_rx);
            let result = inner.coordinator.run(&mut ctx).await;
            if let Err(e) = &result {
                tracing::error!(%saga_id, error = %e, "saga run aborted");
            }
            inner.running.write().await.remove(&saga_id);
            outcome_tx.send_replace(Some(result.map_err(|e| e.to_string())));
        });

        Ok(handle)
    }
}
