use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::types::Json;
use sqlx::{PgConnection, Pool, Postgres, Transaction};
use uuid::Uuid;

use crate::event::Event;
use crate::sql::statements::Statements;
use crate::store::db_event::DbEvent;
use crate::store::postgres::{PgSequencer, PgStoreError};
use crate::store::{Committed, Conflict, EventStore, StoreEvent};
use crate::types::{GlobalOrder, SequenceNumber};
use crate::Aggregate;

/// Default Postgres implementation for the [`EventStore`]. Use this struct in order to have a
/// pre-made implementation of an [`EventStore`] persisting on Postgres.
///
/// Every aggregate type gets its own `<name>_events` table and its own global order sequence.
///
/// The store is protected by an [`Arc`] that allows it to be cloneable still having the same memory
/// reference.
pub struct PgStore<A>
where
    A: Aggregate,
{
    pub(super) inner: Arc<InnerPgStore>,
    pub(super) _aggregate: PhantomData<fn() -> A>,
}

pub(super) struct InnerPgStore {
    pub(super) pool: Pool<Postgres>,
    pub(super) statements: Statements,
    pub(super) sequencer: PgSequencer,
}

impl<A> PgStore<A>
where
    A: Aggregate,
{
    /// Returns the name of the event store table
    pub fn table_name(&self) -> &str {
        self.inner.statements.table_name()
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.inner.pool
    }

    /// Save an event in the event store and return a new [`StoreEvent`] instance.
    ///
    /// # Errors
    ///
    /// Will return an `Err` if the insert of the values into the database fails. A concurrent writer
    /// that took the same sequence number first shows up as a [`Conflict`].
    async fn save_event(
        &self,
        aggregate_id: Uuid,
        event: A::Event,
        occurred_on: DateTime<Utc>,
        sequence_number: SequenceNumber,
        connection: &mut PgConnection,
    ) -> Result<StoreEvent<A::Event>, PgStoreError> {
        let id: Uuid = Uuid::new_v4();
        let global_order: GlobalOrder = self.inner.sequencer.next_order(&mut *connection).await?;
        let event_type: &'static str = event.event_type();

        let _ = sqlx::query(self.inner.statements.insert())
            .bind(id)
            .bind(aggregate_id)
            .bind(sequence_number)
            .bind(global_order)
            .bind(event_type)
            .bind(Json(&event))
            .bind(occurred_on)
            .execute(connection)
            .await
            .map_err(|error| match error {
                sqlx::Error::Database(ref database_error) if database_error.is_unique_violation() => {
                    PgStoreError::Conflict(Conflict {
                        aggregate_id,
                        expected: sequence_number - 1,
                        actual: None,
                    })
                }
                error => PgStoreError::Sqlx(error),
            })?;

        Ok(StoreEvent {
            id,
            aggregate_id,
            payload: event,
            occurred_on,
            sequence_number,
            global_order,
            event_type: event_type.to_string(),
        })
    }

    /// Fails with a [`Conflict`] if the head of the stream is not `expected_sequence_number`.
    ///
    /// The head is read on the given connection, so events inserted earlier in the same transaction
    /// count towards it.
    async fn check_head(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        connection: &mut PgConnection,
    ) -> Result<(), PgStoreError> {
        let head: SequenceNumber = sqlx::query_scalar::<_, SequenceNumber>(self.inner.statements.select_head())
            .bind(aggregate_id)
            .fetch_one(connection)
            .await?;

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

    async fn append_with(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<A::Event>,
        connection: &mut PgConnection,
    ) -> Result<Vec<StoreEvent<A::Event>>, PgStoreError> {
        self.check_head(aggregate_id, expected_sequence_number, &mut *connection)
            .await?;

        let occurred_on: DateTime<Utc> = Utc::now();
        let mut store_events: Vec<StoreEvent<A::Event>> = Vec::with_capacity(events.len());

        for (sequence_number, event) in (expected_sequence_number + 1..).zip(events) {
            let store_event: StoreEvent<A::Event> = self
                .save_event(aggregate_id, event, occurred_on, sequence_number, &mut *connection)
                .await?;

            store_events.push(store_event);
        }

        Ok(store_events)
    }

    /// Opens a transaction on the pool of the store. Appends made through it, to any number of
    /// aggregate instances, become visible together on [`PgTransaction::commit`].
    ///
    /// # Errors
    ///
    /// Will return an `Err` if no connection can be acquired from the pool.
    pub async fn begin(&self) -> Result<PgTransaction<A>, PgStoreError> {
        Ok(PgTransaction {
            store: self.clone(),
            transaction: self.inner.pool.begin().await?,
        })
    }
}

/// A pending write on a [`PgStore`].
///
/// Global orders are taken from the sequence as events are appended. Dropping the transaction
/// without committing rolls it back, and the global orders it took are burned.
///
/// After a failed append, including a [`Conflict`], Postgres refuses any further statement in
/// the transaction: roll it back and start over.
pub struct PgTransaction<A>
where
    A: Aggregate,
{
    store: PgStore<A>,
    transaction: Transaction<'static, Postgres>,
}

impl<A> PgTransaction<A>
where
    A: Aggregate,
{
    /// Appends the events to the stream of the given aggregate instance, inside the transaction.
    ///
    /// # Errors
    ///
    /// Will return an `Err` on a [`Conflict`], or if the insert fails.
    pub async fn append(
        &mut self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        events: Vec<A::Event>,
    ) -> Result<Vec<StoreEvent<A::Event>>, PgStoreError> {
        self.store
            .append_with(aggregate_id, expected_sequence_number, events, &mut *self.transaction)
            .await
    }

    /// Appends a single event inside the transaction. See [`PgTransaction::append`].
    pub async fn append_event(
        &mut self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: A::Event,
    ) -> Result<Committed, PgStoreError> {
        self.store
            .check_head(aggregate_id, expected_sequence_number, &mut *self.transaction)
            .await?;

        let store_event: StoreEvent<A::Event> = self
            .store
            .save_event(aggregate_id, event, Utc::now(), expected_sequence_number + 1, &mut *self.transaction)
            .await?;

        Ok(store_event.committed())
    }

    /// Moves the transaction over to the store of another aggregate type sharing the same
    /// database, so that events of both types commit together.
    pub fn with_store<B>(self, store: &PgStore<B>) -> PgTransaction<B>
    where
        B: Aggregate,
    {
        PgTransaction {
            store: store.clone(),
            transaction: self.transaction,
        }
    }

    /// Makes every append of the transaction visible at once.
    pub async fn commit(self) -> Result<(), PgStoreError> {
        Ok(self.transaction.commit().await?)
    }

    /// Discards every append of the transaction. Same as dropping it.
    pub async fn rollback(self) -> Result<(), PgStoreError> {
        tracing::debug!(table = self.store.table_name(), "rolling back postgres transaction");
        Ok(self.transaction.rollback().await?)
    }
}

#[async_trait]
impl<A> EventStore for PgStore<A>
where
    A: Aggregate,
{
    type Aggregate = A;
    type Error = PgStoreError;

    // Note: https://github.com/rust-lang/rust-clippy/issues/12281
    #[allow(clippy::blocks_in_conditions)]
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

        let mut transaction: PgTransaction<A> = self.begin().await?;
        let store_events: Vec<StoreEvent<A::Event>> = transaction
            .append(aggregate_id, expected_sequence_number, events)
            .await?;
        transaction.commit().await?;

        Ok(store_events)
    }

    // Note: https://github.com/rust-lang/rust-clippy/issues/12281
    #[allow(clippy::blocks_in_conditions)]
    #[tracing::instrument(skip_all, fields(aggregate_id = %aggregate_id, expected_sequence_number = expected_sequence_number), err)]
    async fn append_event(
        &self,
        aggregate_id: Uuid,
        expected_sequence_number: SequenceNumber,
        event: A::Event,
    ) -> Result<Committed, Self::Error> {
        let mut transaction: PgTransaction<A> = self.begin().await?;
        let committed: Committed = transaction
            .append_event(aggregate_id, expected_sequence_number, event)
            .await?;
        transaction.commit().await?;

        Ok(committed)
    }

    async fn read_stream(&self, aggregate_id: Uuid) -> Result<Vec<StoreEvent<A::Event>>, Self::Error> {
        Ok(sqlx::query_as::<_, DbEvent>(self.inner.statements.by_aggregate_id())
            .bind(aggregate_id)
            .fetch_all(&self.inner.pool)
            .await?
            .into_iter()
            .map(DbEvent::try_into_store_event)
            .collect::<Result<Vec<StoreEvent<A::Event>>, serde_json::Error>>()?)
    }

    fn read_since(&self, after: GlobalOrder, limit: usize) -> BoxStream<'_, Result<StoreEvent<A::Event>, Self::Error>> {
        sqlx::query_as::<_, DbEvent>(self.inner.statements.select_since())
            .bind(after)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch(&self.inner.pool)
            .map(|row| -> Result<StoreEvent<A::Event>, PgStoreError> { Ok(row?.try_into_store_event::<A::Event>()?) })
            .boxed()
    }

    async fn latest_global_order(&self) -> Result<GlobalOrder, Self::Error> {
        Ok(sqlx::query_scalar::<_, GlobalOrder>(self.inner.statements.select_latest())
            .fetch_one(&self.inner.pool)
            .await?)
    }

    async fn recent_global_orders(&self, last_n: usize) -> Result<Vec<GlobalOrder>, Self::Error> {
        Ok(sqlx::query_scalar::<_, GlobalOrder>(self.inner.statements.select_recent())
            .bind(i64::try_from(last_n).unwrap_or(i64::MAX))
            .fetch_all(&self.inner.pool)
            .await?)
    }
}

/// Debug implementation for [`PgStore`]. It just shows the statements, that are the only thing
/// that might be useful to debug.
impl<A: Aggregate> std::fmt::Debug for PgStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("statements", &self.inner.statements)
            .finish()
    }
}

impl<A> Clone for PgStore<A>
where
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _aggregate: PhantomData,
        }
    }
}
