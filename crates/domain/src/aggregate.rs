//! Event-sourcing traits shared by aggregates built from a journal.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded in an aggregate's stream. Named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored alongside the payload in the event store.
    fn event_type(&self) -> &'static str;
}

/// State that is rebuilt by folding its recorded events.
///
/// `apply` must be deterministic and infallible: events are facts that
/// already happened, so replaying the same stream always yields the same
/// state.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    fn aggregate_type() -> &'static str;

    /// `None` until the first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
