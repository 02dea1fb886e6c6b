use std::time::Duration;

use uuid::Uuid;

use eventline::config::{GapMonitorConfig, ProjectorConfig};
use eventline::gap::{GapMonitor, Severity};
use eventline::projector::ProjectorBuilder;
use eventline::store::{EventStore, InMemoryStore};

use crate::aggregate::{TestAggregate, TestEvent, TestProjection};

fn config() -> GapMonitorConfig {
    GapMonitorConfig::default()
        .with_grace_period(Duration::from_secs(10))
        .with_critical_after(Duration::from_secs(120))
}

async fn commit(store: &InMemoryStore<TestAggregate>) {
    store
        .append_event(Uuid::new_v4(), 0, TestEvent::Added { add: 1 })
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn aborted_order_becomes_a_confirmed_gap() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    commit(&store).await;
    commit(&store).await;
    let mut transaction = store.begin();
    transaction
        .append(Uuid::new_v4(), 0, vec![TestEvent::Added { add: 1 }])
        .unwrap();
    commit(&store).await;
    commit(&store).await;
    transaction.rollback();

    let mut monitor = GapMonitor::new(store.clone(), config());
    let mut projector = ProjectorBuilder::new(store.clone(), TestProjection::new())
        .with_config(ProjectorConfig::default().with_lag_window(Duration::from_secs(10)))
        .try_build()
        .await
        .unwrap();

    let report = monitor.check(100).await.unwrap();
    assert_eq!(report.range, Some((1, 5)));
    assert_eq!(report.in_flight, vec![3..=3]);
    assert!(report.is_clean());
    projector.run_once().await.unwrap();

    tokio::time::advance(Duration::from_secs(11)).await;

    let report = monitor.check(100).await.unwrap();
    assert_eq!(report.confirmed().collect::<Vec<_>>(), vec![3]);
    assert_eq!(report.gaps[0].severity, Severity::Warning);
    assert!(report.in_flight.is_empty());

    let outcome = projector.run_once().await.unwrap();
    assert_eq!(outcome.watermark, 5);
    assert_eq!(outcome.skipped, 1);

    tokio::time::advance(Duration::from_secs(120)).await;

    let report = monitor.check(100).await.unwrap();
    assert_eq!(report.critical().flat_map(|gap| gap.orders()).collect::<Vec<_>>(), vec![3]);
}

#[tokio::test(start_paused = true)]
async fn commit_after_the_grace_period_is_a_late_fill() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    commit(&store).await;
    let mut transaction = store.begin();
    transaction
        .append(Uuid::new_v4(), 0, vec![TestEvent::Added { add: 1 }])
        .unwrap();
    commit(&store).await;

    let mut monitor = GapMonitor::new(store.clone(), config());
    let mut projector = ProjectorBuilder::new(store.clone(), TestProjection::new())
        .with_config(ProjectorConfig::default().with_lag_window(Duration::from_secs(10)))
        .try_build()
        .await
        .unwrap();

    monitor.check(100).await.unwrap();
    projector.run_once().await.unwrap();

    tokio::time::advance(Duration::from_secs(15)).await;

    assert_eq!(monitor.check(100).await.unwrap().confirmed().collect::<Vec<_>>(), vec![2]);
    assert_eq!(projector.run_once().await.unwrap().skipped, 1);

    transaction.commit().unwrap();

    let report = monitor.check(100).await.unwrap();
    assert_eq!(report.late_fills, vec![2]);
    assert!(report.gaps.is_empty());

    // The projector moved past it and never applies it.
    assert!(!projector.run_once().await.unwrap().advanced());
    assert_eq!(projector.reader().projection().applied(), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn audit_window_is_bounded_by_last_n() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();

    commit(&store).await;
    drop({
        let mut transaction = store.begin();
        transaction
            .append(Uuid::new_v4(), 0, vec![TestEvent::Added { add: 1 }])
            .unwrap();
        transaction
    });
    for _ in 0..3 {
        commit(&store).await;
    }

    let mut monitor = GapMonitor::new(store.clone(), config());

    let report = monitor.check(3).await.unwrap();
    assert_eq!(report.range, Some((3, 5)));
    assert!(report.in_flight.is_empty());

    let report = monitor.check(10).await.unwrap();
    assert_eq!(report.range, Some((1, 5)));
    assert_eq!(report.in_flight, vec![2..=2]);
}

#[tokio::test]
async fn empty_store_is_clean() {
    let store: InMemoryStore<TestAggregate> = InMemoryStore::new();
    let mut monitor = GapMonitor::new(store, config());

    let report = monitor.check(100).await.unwrap();
    assert_eq!(report.range, None);
    assert!(report.is_clean());
}
