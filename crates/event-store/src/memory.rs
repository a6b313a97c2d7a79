use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{EventStore, validate_batch},
};

#[derive(Default)]
struct Stream {
    aggregate_type: String,
    events: Vec<EventEnvelope>,
}

impl Stream {
    fn version(&self) -> Version {
        self.events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial())
    }
}

/// Event store that keeps every stream in process memory.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Stream>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .map(|s| s.events.len())
            .sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected: Option<Version>,
    ) -> Result<Version> {
        validate_batch(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_version = events[0].version;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_insert_with(|| Stream {
            aggregate_type: events[0].aggregate_type.clone(),
            events: Vec::new(),
        });
        let current = stream.version();

        if let Some(expected) = expected
            && current != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // versions are unique per stream even without an expectation
        if first_version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected.unwrap_or(current),
                actual: current,
            });
        }

        stream.events.extend(events);
        Ok(stream.version())
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .filter(|s| !s.events.is_empty())
            .map(Stream::version))
    }

    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let streams = self.streams.read().await;
        let mut ids: Vec<_> = streams
            .iter()
            .filter(|(_, s)| s.aggregate_type == aggregate_type)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}
