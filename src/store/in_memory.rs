use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::event::Event;
use crate::sequencer::{AtomicSequencer, Sequencer};
use crate::store::db_event::DbEvent;
use crate::store::{Committed, Conflict, EventStore, StoreError, StoreEvent};
use crate::types::{GlobalOrder, SequenceNumber};
use crate::Aggregate;

#[derive(thiserror::Error, Debug)]
pub enum InMemoryStoreError {
    /// Optimistic concurrency violation
    #[error(transparent)]
    Conflict(#[from] Conflict),
    /// Serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError for InMemoryStoreError {
    fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Json(_) => None,
        }
    }

    fn is_retryable(&self) -> bool {
        false
    }
}

/// [`EventStore`] keeping its log in process memory. Meant for tests and local development.
///
/// Like [`crate::store::postgres::PgStore`] it keeps payloads serialized, so that a payload which
/// cannot round trip through JSON fails here as it would against a database.
///
/// The store is protected by an [`Arc`]: clones share the same log.
pub struct InMemoryStore<A> {
    inner: Arc<InnerInMemoryStore>,
    _aggregate: PhantomData<fn() -> A>,
}

struct InnerInMemoryStore {
    sequencer: Box<dyn Sequencer>,
    log: RwLock<Log>,
}

#[derive(Default)]
struct Log {
    /// Global orders of each stream, by sequence number.
    streams: HashMap<Uuid, Vec<GlobalOrder>>,
    events: BTreeMap<GlobalOrder, DbEvent>,
}

impl Log {
    fn head(&self, aggregate_id: &Uuid) -> SequenceNumber {
        self.streams
            .get(aggregate_id)
            .map_or(0, |stream| stream.len() as SequenceNumber)
    }
}

impl<A> InMemoryStore<A>
where
    A: Aggregate,
{
    pub fn new() -> Self {
        Self::with_sequencer(AtomicSequencer::new())
    }

    /// Creates a store drawing its global orders from the given [`Sequencer`].
    pub fn with_sequencer(sequencer: impl Sequencer + 'static) -> Self {
        Self {
            inner: Arc::new(InnerInMemoryStore {
                sequencer: Box::new(sequencer),
                log: RwLock::new(Log::default()),
            }),
            _aggregate: PhantomData,
        }
    }

    /// Opens a transaction. Appends staged in it take their global orders immediately, but only
    /// become visible on [`InMemoryTransaction::commit`].
    pub fn begin(&self) -> InMemoryTransaction<A> {
        InMemoryTransaction {
            store: self.clone(),
            staged: vec![],
        }
    }

    fn read_log(&self) -> RwLockReadGuard<'_, Log> {
        self.inner.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_log(&self) -> RwLockWriteGuard<'_, Log> {
        self.inner.log.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A> Default for InMemoryStore<A>
where
    A: Aggregate,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for InMemoryStore<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _aggregate: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for InMemoryStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("last_issued", &self.inner.sequencer.last_issued())
            .finish()
    }
}

/// A pending write on an [`InMemoryStore`].
///
/// Dropping it without committing rolls it back: the global orders it reserved are lost, exactly
/// like a database sequence value taken by an aborted transaction.
pub struct InMemoryTransaction<A> {
    store: InMemoryStore<A>,
    staged: Vec<StagedAppend>,
}

struct StagedAppend {
    aggregate_id: Uuid,
    expected_sequence_number: SequenceNumber,
    events: Vec<DbEvent>,
}

impl<A> InMemoryTransaction<A>
where
    A: Aggregate,
{
    /// Stages the events, checking the expected sequence number against what is committed or
    /// already staged in this transaction. The head is checked again on commit.
    pub fn append(
        &mut self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<A::Event>,
    ) -> Result<Vec<StoreEvent<A::Event>>, InMemoryStoreError> {
        self.check_head(aggregate_id, expected_sequence_number)?;

        let occurred_on: DateTime<Utc> = Utc::now();
        let mut db_events: Vec<DbEvent> = Vec::with_capacity(events.len());
        let mut store_events: Vec<StoreEvent<A::Event>> = Vec::with_capacity(events.len());

        for (sequence_number, event) in (expected_sequence_number + 1..).zip(events) {
            let (db_event, store_event) = self.stage(aggregate_id, sequence_number, event, occurred_on)?;
            db_events.push(db_event);
            store_events.push(store_event);
        }

        self.staged.push(StagedAppend {
            aggregate_id,
            expected_sequence_number,
            events: db_events,
        });

        Ok(store_events)
    }

    /// Stages a single event. See [`InMemoryTransaction::append`].
    pub fn append_event(
        &mut self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: A::Event,
    ) -> Result<Committed, InMemoryStoreError> {
        self.check_head(aggregate_id, expected_sequence_number)?;

        let (db_event, store_event) = self.stage(aggregate_id, expected_sequence_number + 1, event, Utc::now())?;

        self.staged.push(StagedAppend {
            aggregate_id,
            expected_sequence_number,
            events: vec![db_event],
        });

        Ok(store_event.committed())
    }

    /// Makes every staged append visible at once, or none of them if any stream head moved.
    pub fn commit(self) -> Result<(), InMemoryStoreError> {
        let Self { store, staged } = self;
        let mut log = store.write_log();

        let mut heads: HashMap<Uuid, SequenceNumber> = HashMap::new();
        for append in &staged {
            let head: SequenceNumber = *heads
                .entry(append.aggregate_id)
                .or_insert_with(|| log.head(&append.aggregate_id));

            if head != append.expected_sequence_number {
                tracing::debug!(
                    aggregate_id = %append.aggregate_id,
                    expected = append.expected_sequence_number,
                    actual = head,
                    "aborting in-memory transaction on conflict"
                );
                return Err(Conflict {
                    aggregate_id: append.aggregate_id,
                    expected: append.expected_sequence_number,
                    actual: Some(head),
                }
                .into());
            }

            heads.insert(
                append.aggregate_id,
                append.expected_sequence_number + append.events.len() as SequenceNumber,
            );
        }

        for append in staged {
            let stream = log.streams.entry(append.aggregate_id).or_default();
            stream.extend(append.events.iter().map(|event| event.global_order));

            for event in append.events {
                log.events.insert(event.global_order, event);
            }
        }

        Ok(())
    }

    /// Discards the staged appends. Same as dropping the transaction.
    pub fn rollback(self) {
        let burned: usize = self.staged.iter().map(|append| append.events.len()).sum();
        tracing::debug!(burned, "rolling back in-memory transaction");
    }

    fn check_head(&self, aggregate_id: Uuid, expected_sequence_number: SequenceNumber) -> Result<(), InMemoryStoreError> {
        let head: SequenceNumber = match self.staged_head(&aggregate_id) {
            Some(head) => head,
            None => self.store.read_log().head(&aggregate_id),
        };

        if head != expected_sequence_number {
            return Err(Conflict {
                aggregate_id,
                expected: expected_sequence_number,
                actual: Some(head),
            }
            .into());
        }

        Ok(())
    }

    /// Serializes the event and reserves its global order.
    fn stage(
        &self,
        aggregate_id: Uuid,
        sequence_number: SequenceNumber,
        event: A::Event,
        occurred_on: DateTime<Utc>,
    ) -> Result<(DbEvent, StoreEvent<A::Event>), InMemoryStoreError> {
        let payload = serde_json::to_value(&event)?;
        let db_event = DbEvent {
            id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            global_order: self.store.inner.sequencer.next_order(),
            event_type: event.event_type().to_string(),
            payload,
            occurred_on,
        };

        let store_event = StoreEvent {
            id: db_event.id,
            aggregate_id,
            payload: event,
            occurred_on,
            sequence_number,
            global_order: db_event.global_order,
            event_type: db_event.event_type.clone(),
        };

        Ok((db_event, store_event))
    }

    fn staged_head(&self, aggregate_id: &Uuid) -> Option<SequenceNumber> {
        self.staged
            .iter()
            .rev()
            .find(|append| &append.aggregate_id == aggregate_id)
            .map(|append| append.expected_sequence_number + append.events.len() as SequenceNumber)
    }
}

#[async_trait]
impl<A> EventStore for InMemoryStore<A>
where
    A: Aggregate,
{
    type Aggregate = A;
    type Error = InMemoryStoreError;

    #[tracing::instrument(skip_all, fields(aggregate_id = %aggregate_id, expected_sequence_number = expected_sequence_number), err)]
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<A::Event>,
    ) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut transaction = self.begin();
        let store_events = transaction.append(aggregate_id, expected_sequence_number, events)?;
        transaction.commit()?;

        Ok(store_events)
    }

    #[tracing::instrument(skip_all, fields(aggregate_id = %aggregate_id, expected_sequence_number = expected_sequence_number), err)]
    async fn append_event(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: A::Event,
    ) -> Result<Committed, Self::Error> {
        let mut transaction = self.begin();
        let committed = transaction.append_event(aggregate_id, expected_sequence_number, event)?;
        transaction.commit()?;

        Ok(committed)
    }

    async fn read_stream(&self, aggregate_id: Uuid) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        let db_events: Vec<DbEvent> = {
            let log = self.read_log();
            log.streams
                .get(&aggregate_id)
                .into_iter()
                .flatten()
                .filter_map(|global_order| log.events.get(global_order).cloned())
                .collect()
        };

        Ok(db_events
            .into_iter()
            .map(DbEvent::try_into_store_event)
            .collect::<Result<Vec<StoreEvent<A::Event>>, serde_json::Error>>()?)
    }

    fn read_since(
        &self,
        after: GlobalOrder,
        limit: usize,
    ) -> BoxStream<'_, Result<StoreEvent<A::Event>, Self::Error>> {
        let db_events: Vec<DbEvent> = self
            .read_log()
            .events
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(limit)
            .map(|(_, event)| event.clone())
            .collect();

        futures::stream::iter(db_events)
            .map(|event| event.try_into_store_event::<A::Event>().map_err(InMemoryStoreError::from))
            .boxed()
    }

    async fn latest_global_order(&self) -> Result<GlobalOrder, Self::Error> {
        Ok(self.read_log().events.keys().next_back().copied().unwrap_or(0))
    }

    async fn recent_global_orders(&self, last_n: usize) -> Result<Vec<GlobalOrder>, Self::Error> {
        let mut global_orders: Vec<GlobalOrder> = self.read_log().events.keys().rev().take(last_n).copied().collect();
        global_orders.reverse();
        Ok(global_orders)
    }
}
