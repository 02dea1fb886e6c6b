use uuid::Uuid;

use crate::state::AggregateState;
use crate::store::{EventStore, StoreEvent};
use crate::Aggregate;

type AggregateOf<E> = <E as EventStore>::Aggregate;
type StateOf<E> = <AggregateOf<E> as Aggregate>::State;
type EventOf<E> = <AggregateOf<E> as Aggregate>::Event;

/// The AggregateManager is responsible for coupling the Aggregate with a Store, so that the events
/// can be persisted when handled, and the state can be reconstructed by loading and apply events sequentially.
///
/// The basic APIs are:
/// 1. handle_command
/// 2. load
pub struct AggregateManager<E>
where
    E: EventStore,
{
    event_store: E,
}

impl<E> AggregateManager<E>
where
    E: EventStore,
{
    /// Creates a new instance of an [`AggregateManager`].
    pub fn new(event_store: E) -> Self {
        Self { event_store }
    }

    /// Validates and handles the command onto the given state, and then passes the events to the store.
    ///
    /// The sequence number of the given state is the expected head of the stream: if some other
    /// writer appended in the meantime the store rejects the events with a
    /// [`crate::store::Conflict`], and the caller should [`AggregateManager::load`] and retry.
    ///
    /// The returned store events carry the global order to wait for before reading own writes.
    pub async fn handle_command<Er>(
        &self,
        aggregate_state: AggregateState<StateOf<E>>,
        command: <AggregateOf<E> as Aggregate>::Command,
    ) -> Result<Vec<StoreEvent<EventOf<E>>>, Er>
    where
        Er: From<E::Error> + From<<AggregateOf<E> as Aggregate>::Error>,
    {
        let events: Vec<EventOf<E>> = <AggregateOf<E> as Aggregate>::handle_command(aggregate_state.inner(), command)?;

        Ok(self
            .event_store
            .append(*aggregate_state.id(), *aggregate_state.sequence_number(), events)
            .await?)
    }

    /// Loads an aggregate instance from the event store, by applying previously persisted events onto
    /// the aggregate state by order of their sequence number.
    pub async fn load(
        &self,
        aggregate_id: impl Into<Uuid> + Send,
    ) -> Result<Option<AggregateState<StateOf<E>>>, E::Error> {
        let aggregate_id: Uuid = aggregate_id.into();

        let store_events: Vec<StoreEvent<EventOf<E>>> = self.event_store.read_stream(aggregate_id).await?;

        Ok(if store_events.is_empty() {
            None
        } else {
            let aggregate_state = AggregateState::with_id(aggregate_id);
            Some(aggregate_state.apply_store_events(store_events, <AggregateOf<E> as Aggregate>::apply_event))
        })
    }

    /// Returns the internal event store
    pub fn event_store(&self) -> &E {
        &self.event_store
    }
}
