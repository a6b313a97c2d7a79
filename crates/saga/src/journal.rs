//! Write-ahead journal of saga events.
//!
//! An event is appended before it is applied, so a state that a query
//! observes is always recoverable from the store.

use std::sync::Arc;

use common::AggregateId;
use domain::{Aggregate, DomainEvent};
use event_store::{EventEnvelope, EventStore};

use crate::error::Result;
use crate::events::SagaEvent;
use crate::state::SagaState;

#[derive(Clone)]
pub struct SagaJournal {
    store: Arc<dyn EventStore>,
}

impl SagaJournal {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Persists `event` for the saga, then applies it to `state`.
    ///
    /// `SagaStarted` carries the saga id, so it can open a new stream.
    pub async fn record(&self, state: &mut SagaState, event: SagaEvent) -> Result<()> {
        let saga_id = match (&event, state.saga_id()) {
            (SagaEvent::SagaStarted(data), _) => data.saga_id,
            (_, Some(id)) => id,
            (_, None) => {
                return Err(crate::error::SagaError::InvalidInput(
                    "saga must be started before recording events".to_string(),
                ));
            }
        };

        let current = state.version();
        let envelope = EventEnvelope::record(
            saga_id,
            SagaState::aggregate_type(),
            event.event_type(),
            current.next(),
            &event,
        )?;
        let version = self.store.append(vec![envelope], Some(current)).await?;

        state.apply(event);
        state.set_version(version);
        Ok(())
    }

    /// Rebuilds a saga from its events. `None` if nothing was recorded.
    pub async fn load(&self, saga_id: AggregateId) -> Result<Option<SagaState>> {
        let envelopes = self.store.load(saga_id).await?;
        let Some(last) = envelopes.last() else {
            return Ok(None);
        };
        let version = last.version;

        let mut state = SagaState::default();
        for envelope in &envelopes {
            state.apply(envelope.decode::<SagaEvent>()?);
        }
        state.set_version(version);
        Ok(Some(state))
    }

    pub async fn saga_ids(&self) -> Result<Vec<AggregateId>> {
        Ok(self.store.aggregate_ids(SagaState::aggregate_type()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_fulfillment::Step;
    use common::{CustomerId, OrderId};
    use domain::{Money, OrderItem};
    use event_store::{InMemoryEventStore, Version};

    fn started_event(saga_id: AggregateId) -> SagaEvent {
        SagaEvent::saga_started(
            saga_id,
            OrderId::new("order-1"),
            CustomerId::new("cust-1"),
            vec![OrderItem::new("SKU-1", 1, Money::from_cents(100))],
        )
    }

    #[tokio::test]
    async fn record_then_load_replays_state() {
        let store = InMemoryEventStore::new();
        let journal = SagaJournal::new(Arc::new(store.clone()));
        let saga_id = AggregateId::new();

        let mut state = SagaState::default();
        journal.record(&mut state, started_event(saga_id)).await.unwrap();
        journal
            .record(&mut state, SagaEvent::step_started(Step::CreateOrder))
            .await
            .unwrap();
        journal
            .record(&mut state, SagaEvent::order_created(OrderId::new("order-1")))
            .await
            .unwrap();
        assert_eq!(state.version(), Version::new(3));
        assert_eq!(store.event_count().await, 3);

        let loaded = journal.load(saga_id).await.unwrap().unwrap();
        assert_eq!(loaded.version(), Version::new(3));
        assert_eq!(loaded.order_id(), state.order_id());
        assert_eq!(loaded.next_step(), Some(Step::CheckInventory));
        assert_eq!(journal.saga_ids().await.unwrap(), vec![saga_id]);
    }

    #[tokio::test]
    async fn load_unknown_saga_is_none() {
        let journal = SagaJournal::new(Arc::new(InMemoryEventStore::new()));
        assert!(journal.load(AggregateId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_state_cannot_record() {
        let journal = SagaJournal::new(Arc::new(InMemoryEventStore::new()));
        let saga_id = AggregateId::new();

        let mut state = SagaState::default();
        journal.record(&mut state, started_event(saga_id)).await.unwrap();
        let mut stale = state.clone();
        journal
            .record(&mut state, SagaEvent::step_started(Step::CreateOrder))
            .await
            .unwrap();

        let result = journal
            .record(&mut stale, SagaEvent::step_started(Step::CreateOrder))
            .await;
        assert!(result.is_err());
        assert_eq!(stale.version(), Version::new(1));
    }

    #[tokio::test]
    async fn events_require_a_started_saga() {
        let journal = SagaJournal::new(Arc::new(InMemoryEventStore::new()));
        let mut state = SagaState::default();
        let result = journal
            .record(&mut state, SagaEvent::step_started(Step::CreateOrder))
            .await;
        assert!(result.is_err());
    }
}
