use std::ops::Deref;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::types::{GlobalOrder, SequenceNumber};
use crate::Aggregate;

pub use in_memory::{InMemoryStore, InMemoryStoreError, InMemoryTransaction};

pub(crate) mod db_event;
mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// The aggregate head moved since the caller loaded it.
///
/// Recoverable: reload the aggregate and retry the command.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("conflict on aggregate {aggregate_id}: expected sequence number {expected}, found {actual:?}")]
pub struct Conflict {
    pub aggregate_id: Uuid,
    pub expected: SequenceNumber,
    /// The current head, when the store could tell.
    pub actual: Option<SequenceNumber>,
}

/// Errors returned by an [`EventStore`].
pub trait StoreError: std::error::Error + Send + Sync + 'static {
    /// Returns the [`Conflict`] if this error is an optimistic concurrency violation.
    fn conflict(&self) -> Option<&Conflict>;

    /// Whether the failed operation may succeed if tried again unchanged, e.g. the storage was
    /// temporarily unreachable. Conflicts are not retryable as-is: the caller must reload first.
    fn is_retryable(&self) -> bool;
}

/// Where an appended event landed: its position in the aggregate stream and in the global order.
///
/// Callers thread the `global_order` through to [`crate::projector::ProjectionReader::wait_for_version`]
/// to read their own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Committed {
    pub sequence_number: SequenceNumber,
    pub global_order: GlobalOrder,
}

/// An EventStore is responsible for appending the events an aggregate emits, and loading them back
/// either per aggregate or in global order.
#[async_trait]
pub trait EventStore: Send + Sync {
    type Aggregate: Aggregate;
    type Error: StoreError;

    /// Appends the events to the stream of the given aggregate, in a single transaction: either all
    /// the events are appended, or none is.
    ///
    /// Fails with a [`Conflict`] if the last sequence number of the stream is not
    /// `expected_sequence_number` (zero for a new aggregate). Global orders are assigned inside the
    /// same transaction, and the events become visible to readers only once it commits.
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<<Self::Aggregate as Aggregate>::Event>,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as Aggregate>::Event>>, Self::Error>;

    /// Appends a single event, returning where it landed. Same guarantees as [`EventStore::append`].
    async fn append_event(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: <Self::Aggregate as Aggregate>::Event,
    ) -> Result<Committed, Self::Error>;

    /// Loads the events of an aggregate instance, by sequence number. Used to rebuild its state.
    async fn read_stream(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as Aggregate>::Event>>, Self::Error>;

    /// Streams at most `limit` committed events whose global order is strictly greater than
    /// `after`, by increasing global order.
    ///
    /// The stream is finite. Restart it from the last order seen to keep consuming.
    fn read_since(
        &self,
        after: GlobalOrder,
        limit: usize,
    ) -> BoxStream<'_, Result<StoreEvent<<Self::Aggregate as Aggregate>::Event>, Self::Error>>;

    /// The highest committed global order, or 0 when the store is empty.
    async fn latest_global_order(&self) -> Result<GlobalOrder, Self::Error>;

    /// The last `last_n` committed global orders, ascending.
    async fn recent_global_orders(&self, last_n: usize) -> Result<Vec<GlobalOrder>, Self::Error>;
}

/// Blanket implementation making an [`EventStore`] every (smart) pointer to an [`EventStore`],
/// e.g. `&Store`, `Box<Store>`, `Arc<Store>`.
/// This is particularly useful when the same store is shared by writers, projectors and monitors.
#[async_trait]
impl<S, T> EventStore for T
where
    S: EventStore + ?Sized,
    T: Deref<Target = S> + Send + Sync,
    for<'a> S: 'a,
    for<'a> <S::Aggregate as Aggregate>::Event: 'a,
{
    type Aggregate = S::Aggregate;
    type Error = S::Error;

    /// Deref call to [`EventStore::append`].
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<<Self::Aggregate as Aggregate>::Event>,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as Aggregate>::Event>>, Self::Error> {
        self.deref()
            .append(aggregate_id, expected_sequence_number, events)
            .await
    }

    /// Deref call to [`EventStore::append_event`].
    async fn append_event(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: <Self::Aggregate as Aggregate>::Event,
    ) -> Result<Committed, Self::Error> {
        self.deref()
            .append_event(aggregate_id, expected_sequence_number, event)
            .await
    }

    /// Deref call to [`EventStore::read_stream`].
    async fn read_stream(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoreEvent<<Self::Aggregate as Aggregate>::Event>>, Self::Error> {
        self.deref().read_stream(aggregate_id).await
    }

    /// Deref call to [`EventStore::read_since`].
    fn read_since(
        &self,
        after: GlobalOrder,
        limit: usize,
    ) -> BoxStream<'_, Result<StoreEvent<<Self::Aggregate as Aggregate>::Event>, Self::Error>> {
        self.deref().read_since(after, limit)
    }

    /// Deref call to [`EventStore::latest_global_order`].
    async fn latest_global_order(&self) -> Result<GlobalOrder, Self::Error> {
        self.deref().latest_global_order().await
    }

    /// Deref call to [`EventStore::recent_global_orders`].
    async fn recent_global_orders(&self, last_n: usize) -> Result<Vec<GlobalOrder>, Self::Error> {
        self.deref().recent_global_orders(last_n).await
    }
}

/// A `StoreEvent` contains the payload (the original event) alongside the event's metadata.
#[derive(Debug, Clone)]
pub struct StoreEvent<Event> {
    /// Uniquely identifies an event among all events emitted from all aggregates.
    pub id: Uuid,
    /// The aggregate instance that emitted the event.
    pub aggregate_id: Uuid,
    /// The original, emitted, event.
    pub payload: Event,
    /// Wall clock of the writer when the event was appended. Not monotonic with `global_order`.
    pub occurred_on: DateTime<Utc>,
    /// The sequence number of the event, within its specific aggregate instance.
    pub sequence_number: SequenceNumber,
    /// The position of the event among every event of the store.
    pub global_order: GlobalOrder,
    /// See [`crate::Event::event_type`].
    pub event_type: String,
}

impl<Event> StoreEvent<Event> {
    /// Returns the sequence number of the event, within its specific aggregate instance.
    pub const fn sequence_number(&self) -> &SequenceNumber {
        &self.sequence_number
    }

    /// Returns the position of the event among every event of the store.
    pub const fn global_order(&self) -> &GlobalOrder {
        &self.global_order
    }

    /// Returns the original, emitted, event.
    pub const fn payload(&self) -> &Event {
        &self.payload
    }

    pub fn committed(&self) -> Committed {
        Committed {
            sequence_number: self.sequence_number,
            global_order: self.global_order,
        }
    }
}
