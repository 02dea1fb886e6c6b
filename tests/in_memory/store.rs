use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use rand::Rng;
use uuid::Uuid;

use eventline::error::StoreError;
use eventline::sequencer::AtomicSequencer;
use eventline::store::{Committed, EventStore, InMemoryStore, InMemoryStoreError, StoreEvent};
use eventline::types::GlobalOrder;

use crate::aggregate::{TestAggregate, TestEvent};

fn added(add: i32) -> TestEvent {
    TestEvent::Added { add }
}

async fn read_all(store: &InMemoryStore<TestAggregate>, after: GlobalOrder, limit: usize) -> Vec<StoreEvent<TestEvent>> {
    store
        .read_since(after, limit)
        .map(|event| event.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn sequence_numbers_are_gapless_from_one() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let aggregate_id: Uuid = Uuid::new_v4();

    let store_events = store
        .append(aggregate_id, 0, vec![added(1), added(2), added(3)])
        .await
        .unwrap();
    assert_eq!(
        store_events.iter().map(|event| event.sequence_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    store.append(aggregate_id, 3, vec![added(4), added(5)]).await.unwrap();

    let stream = store.read_stream(aggregate_id).await.unwrap();
    assert_eq!(
        stream.iter().map(|event| event.sequence_number).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(stream[4].payload, added(5));
    assert_eq!(stream[0].event_type, "TestAdded");
}

#[tokio::test]
async fn append_event_returns_where_it_landed() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    let first: Committed = store.append_event(Uuid::new_v4(), 0, added(1)).await.unwrap();
    let second: Committed = store.append_event(Uuid::new_v4(), 0, added(1)).await.unwrap();

    assert_eq!(first.sequence_number, 1);
    assert_eq!(second.sequence_number, 1);
    assert!(second.global_order > first.global_order);
    assert_eq!(store.latest_global_order().await.unwrap(), second.global_order);
}

#[tokio::test]
async fn stale_expected_sequence_number_is_a_conflict() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let aggregate_id: Uuid = Uuid::new_v4();

    store.append(aggregate_id, 0, vec![added(1)]).await.unwrap();

    let error: InMemoryStoreError = store.append(aggregate_id, 0, vec![added(1)]).await.unwrap_err();
    let conflict = error.conflict().expect("expected a conflict");

    assert_eq!(conflict.aggregate_id, aggregate_id);
    assert_eq!(conflict.expected, 0);
    assert_eq!(conflict.actual, Some(1));
    assert!(!error.is_retryable());

    // Nothing of the failed append is visible.
    assert_eq!(store.read_stream(aggregate_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_appends_with_same_expectation_one_wins() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let aggregate_id: Uuid = Uuid::new_v4();

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.append(aggregate_id, 0, vec![added(1)]).await }
    });
    let second = tokio::spawn({
        let store = store.clone();
        async move { store.append(aggregate_id, 0, vec![added(2), added(3)]).await }
    });

    let results = vec![first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|error| error.conflict().is_some()));

    let stream = store.read_stream(aggregate_id).await.unwrap();
    assert_eq!(stream[0].sequence_number, 1);
    assert_eq!(*stream.last().unwrap().sequence_number(), stream.len() as i64);
}

#[tokio::test]
async fn rolled_back_global_orders_are_never_reused() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    let mut transaction = store.begin();
    let staged = transaction
        .append(Uuid::new_v4(), 0, vec![added(1), added(2)])
        .unwrap();
    assert_eq!(staged.iter().map(|event| event.global_order).collect::<Vec<_>>(), vec![1, 2]);

    // Staged events are not visible.
    assert_eq!(store.latest_global_order().await.unwrap(), 0);
    transaction.rollback();

    let committed: Committed = store.append_event(Uuid::new_v4(), 0, added(3)).await.unwrap();
    assert_eq!(committed.global_order, 3);

    // Dropping is a rollback as well.
    {
        let mut transaction = store.begin();
        transaction.append(Uuid::new_v4(), 0, vec![added(4)]).unwrap();
    }

    let committed: Committed = store.append_event(Uuid::new_v4(), 0, added(5)).await.unwrap();
    assert_eq!(committed.global_order, 5);
    assert_eq!(store.recent_global_orders(10).await.unwrap(), vec![3, 5]);
}

#[tokio::test]
async fn transaction_commits_all_or_nothing() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let contended: Uuid = Uuid::new_v4();
    let bystander: Uuid = Uuid::new_v4();

    let mut transaction = store.begin();
    transaction.append(bystander, 0, vec![added(1)]).unwrap();
    transaction.append(contended, 0, vec![added(1)]).unwrap();
    // Later appends in the same transaction see the staged head.
    transaction.append(contended, 1, vec![added(1)]).unwrap();

    store.append(contended, 0, vec![added(9)]).await.unwrap();

    let error = transaction.commit().unwrap_err();
    assert!(error.conflict().is_some());

    assert!(store.read_stream(bystander).await.unwrap().is_empty());
    assert_eq!(store.read_stream(contended).await.unwrap().len(), 1);
}

#[tokio::test]
async fn transaction_append_event_counts_staged_events() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let aggregate_id: Uuid = Uuid::new_v4();

    let mut transaction = store.begin();
    transaction.append(aggregate_id, 0, vec![added(1)]).unwrap();
    let committed: Committed = transaction.append_event(aggregate_id, 1, added(2)).unwrap();
    assert_eq!(committed.sequence_number, 2);

    let error = transaction.append_event(aggregate_id, 1, added(3)).unwrap_err();
    assert_eq!(error.conflict().unwrap().actual, Some(2));

    assert_eq!(store.latest_global_order().await.unwrap(), 0);
    transaction.commit().unwrap();

    let stream = store.read_stream(aggregate_id).await.unwrap();
    assert_eq!(stream.len(), 2);
    assert_eq!(stream[1].global_order, committed.global_order);
}

#[tokio::test]
async fn read_since_resumes_after_given_order() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let aggregate_id: Uuid = Uuid::new_v4();

    for sequence_number in 0..5 {
        store.append(aggregate_id, sequence_number, vec![added(1)]).await.unwrap();
    }

    let first_page = read_all(&store, 0, 2).await;
    assert_eq!(first_page.iter().map(|event| event.global_order).collect::<Vec<_>>(), vec![1, 2]);

    let rest = read_all(&store, first_page[1].global_order, 100).await;
    assert_eq!(rest.iter().map(|event| event.global_order).collect::<Vec<_>>(), vec![3, 4, 5]);

    assert!(read_all(&store, 5, 100).await.is_empty());
}

#[tokio::test]
async fn appending_nothing_is_a_no_op() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    let store_events = store.append(Uuid::new_v4(), 0, vec![]).await.unwrap();

    assert!(store_events.is_empty());
    assert_eq!(store.latest_global_order().await.unwrap(), 0);
}

#[tokio::test]
async fn store_can_start_from_a_given_order() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::with_sequencer(AtomicSequencer::starting_after(100));

    let committed: Committed = store.append_event(Uuid::new_v4(), 0, added(1)).await.unwrap();

    assert_eq!(committed.global_order, 101);
}

#[tokio::test]
async fn many_writers_get_unique_orders_and_gapless_streams() {
    let store: Arc<InMemoryStore<TestAggregate>> = Arc::new(InMemoryStore::new());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            let events: i64 = rand::thread_rng().gen_range(1..8);

            tokio::spawn(async move {
                let aggregate_id: Uuid = Uuid::new_v4();
                for sequence_number in 0..events {
                    store
                        .append(aggregate_id, sequence_number, vec![TestEvent::Added { add: 1 }])
                        .await
                        .unwrap();
                }
                (aggregate_id, events)
            })
        })
        .collect();

    let mut total: usize = 0;
    for handle in handles {
        let (aggregate_id, events) = handle.await.unwrap();
        let stream = store.read_stream(aggregate_id).await.unwrap();

        assert_eq!(
            stream.iter().map(|event| event.sequence_number).collect::<Vec<_>>(),
            (1..=events).collect::<Vec<_>>()
        );
        total += stream.len();
    }

    let global_orders = store.recent_global_orders(usize::MAX).await.unwrap();
    let unique: HashSet<GlobalOrder> = global_orders.iter().copied().collect();

    assert_eq!(global_orders.len(), total);
    assert_eq!(unique.len(), total);
    assert!(global_orders.windows(2).all(|pair| pair[0] < pair[1]));
}

async fn append_through<S>(store: S, add: i32) -> Committed
where
    S: EventStore<Aggregate = TestAggregate>,
{
    store.append_event(Uuid::new_v4(), 0, added(add)).await.unwrap()
}

#[tokio::test]
async fn smart_pointers_to_a_store_are_stores() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    append_through(&store, 1).await;
    append_through(Arc::new(store.clone()), 2).await;
    let committed: Committed = append_through(Box::new(store.clone()), 3).await;

    let shared: Arc<InMemoryStore<TestAggregate>> = Arc::new(store.clone());
    let events = shared.read_since(0, 10).map(|event| event.unwrap()).collect::<Vec<_>>().await;
    assert_eq!(events.len(), 3);
    assert_eq!(shared.latest_global_order().await.unwrap(), committed.global_order);
}
