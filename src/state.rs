use uuid::Uuid;

use crate::store::StoreEvent;
use crate::types::SequenceNumber;

/// The internal state of an aggregate instance, together with its id and the sequence number of
/// the last event applied onto it.
///
/// The sequence number is the `expected_sequence_number` sent to the store on the next append.
#[derive(Debug, Clone)]
pub struct AggregateState<S> {
    id: Uuid,
    sequence_number: SequenceNumber,
    inner: S,
}

impl<S: Default> Default for AggregateState<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Default> AggregateState<S> {
    /// Creates a new instance of an [`AggregateState`] with a new unique id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Creates a new instance of an [`AggregateState`] with the given aggregate id.
    ///
    /// Use this when a command must be applied onto an aggregate whose id is already known but
    /// whose stream may still be empty.
    #[must_use]
    pub fn with_id(id: impl Into<Uuid>) -> Self {
        Self {
            id: id.into(),
            sequence_number: 0,
            inner: Default::default(),
        }
    }
}

impl<S> AggregateState<S> {
    /// Consumes the store events applying them, in order, onto the state.
    pub fn apply_store_events<T, F>(self, store_events: Vec<StoreEvent<T>>, function: F) -> Self
    where
        F: Fn(S, T) -> S,
    {
        store_events.into_iter().fold(self, |mut state, store_event| {
            state.sequence_number = store_event.sequence_number;
            state.inner = function(state.inner, store_event.payload);
            state
        })
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Sequence number of the last event applied onto this state. Zero means a brand new aggregate.
    pub fn sequence_number(&self) -> &SequenceNumber {
        &self.sequence_number
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}
