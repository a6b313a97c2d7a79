use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Append-only storage of aggregate event streams.
///
/// Implementations must be thread-safe and must apply each `append` batch
/// atomically.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events for a single aggregate.
    ///
    /// When `expected` is set the append fails with `ConcurrencyConflict`
    /// unless the stream is currently at exactly that version. Returns the
    /// stream version after the append.
    async fn append(&self, events: Vec<EventEnvelope>, expected: Option<Version>)
    -> Result<Version>;

    /// Returns the events of one aggregate in version order.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Current version of an aggregate, `None` if it has no events.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Ids of every stream of the given aggregate type.
    async fn aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>>;
}

/// Checks that a batch targets one stream with consecutive versions.
pub fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected, event.version
            )));
        }
    }

    Ok(())
}
